//! Ranked-choice voting: an arbiter ranks the candidates, instant-runoff
//! elimination picks the winner.

use super::{format_numbered, StrategyKind, VotingContext, VotingResult, VotingStrategy};
use crate::agent::AgentResponse;
use crate::client_wrapper::{CompletionOptions, Message};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Ask the arbiter for a best-first permutation of the candidates, then run
/// instant-runoff counting over the resulting ballot(s).
///
/// Requires [`VotingContext::arbiter`]; without one the strategy falls back to
/// the first response with a consensus score of `1/N`.  The arbiter's reply is
/// parsed defensively: duplicates are dropped, out-of-range indices ignored,
/// and any missing indices are appended in natural order so the ballot is
/// always a complete permutation.
#[derive(Debug, Default)]
pub struct RankedChoiceVoting;

#[async_trait]
impl VotingStrategy for RankedChoiceVoting {
    async fn reconcile(
        &self,
        task: &str,
        responses: &[AgentResponse],
        context: &VotingContext,
    ) -> Result<VotingResult, EngineError> {
        if responses.is_empty() {
            return Ok(VotingResult::empty(self.kind()));
        }

        let Some(arbiter) = &context.arbiter else {
            log::debug!("ranked choice: no arbiter configured, falling back to first response");
            let first = &responses[0];
            let mut vote_tally = BTreeMap::new();
            vote_tally.insert(first.agent_id.clone(), 1);
            return Ok(VotingResult {
                winning_response: first.content.clone(),
                winning_structured: first.structured.clone(),
                winning_agent_id: first.agent_id.clone(),
                strategy: self.kind(),
                vote_tally,
                consensus_score: 1.0 / responses.len() as f64,
            });
        };

        let n = responses.len();
        let prompt = format!(
            "Task:\n{}\n\nCandidate responses:\n{}\
             Rank all {} responses from best to worst as a comma-separated list of their \
             numbers, best first (for example: \"2,1,3\"). Reply with the ranking only.",
            task,
            format_numbered(responses),
            n
        );
        let opts = CompletionOptions {
            temperature: Some(0.0),
            ..Default::default()
        };
        let reply = arbiter.complete(&[Message::user(prompt)], Some(&opts)).await?;

        let ballot = parse_ranking(&reply.content, n);
        let outcome = instant_runoff(&[ballot], n);

        let mut vote_tally = BTreeMap::new();
        for (option, votes) in &outcome.final_counts {
            vote_tally.insert(responses[*option].agent_id.clone(), *votes);
        }

        let winner = &responses[outcome.winner];
        let ballots_cast = 1.0;
        Ok(VotingResult {
            winning_response: winner.content.clone(),
            winning_structured: winner.structured.clone(),
            winning_agent_id: winner.agent_id.clone(),
            strategy: self.kind(),
            vote_tally,
            consensus_score: (outcome.final_counts.get(&outcome.winner).copied().unwrap_or(0)
                as f64
                / ballots_cast)
                .clamp(0.0, 1.0),
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::RankedChoice
    }
}

/// Parse an arbiter ranking into a complete 0-based permutation of `0..n`.
///
/// In-range 1-based indices are kept in order of first appearance; anything the
/// reply failed to mention is appended in natural order.
pub(crate) fn parse_ranking(content: &str, n: usize) -> Vec<usize> {
    let mut ranking: Vec<usize> = Vec::with_capacity(n);
    let mut current = String::new();
    for ch in content.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else {
            if !current.is_empty() {
                if let Ok(idx) = current.parse::<usize>() {
                    if (1..=n).contains(&idx) && !ranking.contains(&(idx - 1)) {
                        ranking.push(idx - 1);
                    }
                }
            }
            current.clear();
        }
    }
    for idx in 0..n {
        if !ranking.contains(&idx) {
            ranking.push(idx);
        }
    }
    ranking
}

/// Result of an instant-runoff count.
pub(crate) struct RunoffOutcome {
    /// Winning 0-based option index.
    pub winner: usize,
    /// Votes per still-active option in the deciding round.
    pub final_counts: BTreeMap<usize, usize>,
    /// Number of elimination passes performed (at most `n - 1`).
    pub eliminations: usize,
}

/// Instant-runoff over complete-permutation ballots.
///
/// Each round, every ballot's vote goes to its highest-ranked option that has
/// not been eliminated.  An option holding a strict majority of the votes cast
/// wins; otherwise the option with the fewest votes is eliminated and counting
/// repeats.  Terminates after at most `n − 1` eliminations.
pub(crate) fn instant_runoff(ballots: &[Vec<usize>], n: usize) -> RunoffOutcome {
    let mut active: Vec<bool> = vec![true; n];
    let mut eliminations = 0usize;

    loop {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for (option, is_active) in active.iter().enumerate() {
            if *is_active {
                counts.insert(option, 0);
            }
        }

        let mut votes_cast = 0usize;
        for ballot in ballots {
            if let Some(choice) = ballot.iter().find(|&&option| active[option]) {
                *counts.get_mut(choice).expect("active option") += 1;
                votes_cast += 1;
            }
        }

        let remaining = counts.len();
        if remaining == 1 {
            let winner = *counts.keys().next().expect("one option remains");
            return RunoffOutcome {
                winner,
                final_counts: counts,
                eliminations,
            };
        }

        // Strict majority of votes cast wins outright.
        if let Some((&winner, _)) = counts.iter().find(|(_, &votes)| votes * 2 > votes_cast) {
            return RunoffOutcome {
                winner,
                final_counts: counts,
                eliminations,
            };
        }

        // Eliminate the lowest-voted option (lowest index on ties).
        let (&loser, _) = counts
            .iter()
            .min_by_key(|(&option, &votes)| (votes, option))
            .expect("at least two options remain");
        active[loser] = false;
        eliminations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_parses_defensively() {
        assert_eq!(parse_ranking("2,1,3", 3), vec![1, 0, 2]);
        assert_eq!(parse_ranking("2, 2, 9, 1", 3), vec![1, 0, 2]);
        assert_eq!(parse_ranking("garbage", 3), vec![0, 1, 2]);
        assert_eq!(parse_ranking("3", 3), vec![2, 0, 1]);
    }

    #[test]
    fn single_ballot_top_choice_wins() {
        let outcome = instant_runoff(&[vec![1, 0, 2]], 3);
        assert_eq!(outcome.winner, 1);
        assert_eq!(outcome.eliminations, 0);
    }

    #[test]
    fn runoff_eliminates_and_redistributes() {
        // Three ballots, no initial majority for anyone's first choice once
        // the weakest option is eliminated, its votes transfer.
        let ballots = vec![
            vec![0, 1, 2],
            vec![0, 2, 1],
            vec![1, 0, 2],
            vec![2, 1, 0],
            vec![1, 2, 0],
        ];
        let outcome = instant_runoff(&ballots, 3);
        // Option 2 is eliminated first (1 vote); its ballot transfers to 1,
        // giving 0 and 1 a 2/3 split — still no strict majority for 0.
        assert!(outcome.eliminations <= 2);
        assert!(outcome.final_counts.contains_key(&outcome.winner));
    }

    #[test]
    fn terminates_within_n_minus_one_eliminations() {
        // Adversarial near-uniform ballots across 6 options.
        let ballots: Vec<Vec<usize>> = (0..6)
            .map(|i| (0..6).map(|j| (i + j) % 6).collect())
            .collect();
        let outcome = instant_runoff(&ballots, 6);
        assert!(outcome.eliminations <= 5);
    }
}
