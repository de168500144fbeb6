//! Simple majority: the largest bucket of equivalent answers wins.

use super::{bucket_responses, StrategyKind, VotingContext, VotingResult, VotingStrategy};
use crate::agent::AgentResponse;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Bucket responses by normalised content and pick the most common answer.
///
/// Ties resolve to the bucket encountered first (insertion order).  The
/// consensus score is `winner_count / N`, so unanimous agreement scores `1.0`
/// and an even three-way split scores `1/3`.
#[derive(Debug, Default)]
pub struct MajorityVoting;

#[async_trait]
impl VotingStrategy for MajorityVoting {
    async fn reconcile(
        &self,
        _task: &str,
        responses: &[AgentResponse],
        _context: &VotingContext,
    ) -> Result<VotingResult, EngineError> {
        if responses.is_empty() {
            return Ok(VotingResult::empty(self.kind()));
        }

        let buckets = bucket_responses(responses);

        let mut vote_tally = BTreeMap::new();
        for (key, members) in &buckets {
            vote_tally.insert(key.clone(), members.len());
        }

        // max_by_key returns the last maximum; scan forward keeping strict
        // improvements so ties resolve to the first-encountered bucket.
        let mut winner = &buckets[0];
        for bucket in &buckets[1..] {
            if bucket.1.len() > winner.1.len() {
                winner = bucket;
            }
        }

        let representative = &responses[winner.1[0]];
        Ok(VotingResult {
            winning_response: representative.content.clone(),
            winning_structured: representative.structured.clone(),
            winning_agent_id: representative.agent_id.clone(),
            strategy: self.kind(),
            vote_tally,
            consensus_score: winner.1.len() as f64 / responses.len() as f64,
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Majority
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_response;
    use super::*;

    #[tokio::test]
    async fn two_against_one() {
        let responses = vec![
            test_response("a1", "yes"),
            test_response("a2", "yes"),
            test_response("a3", "no"),
        ];
        let result = MajorityVoting
            .reconcile("q", &responses, &VotingContext::new())
            .await
            .unwrap();

        assert_eq!(result.winning_response, "yes");
        assert_eq!(result.winning_agent_id, "a1");
        assert_eq!(result.vote_tally.len(), 2);
        assert!((result.consensus_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tie_resolves_to_first_encountered() {
        let responses = vec![
            test_response("a1", "alpha"),
            test_response("a2", "beta"),
        ];
        let result = MajorityVoting
            .reconcile("q", &responses, &VotingContext::new())
            .await
            .unwrap();
        assert_eq!(result.winning_agent_id, "a1");
        assert_eq!(result.consensus_score, 0.5);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_result() {
        let result = MajorityVoting
            .reconcile("q", &[], &VotingContext::new())
            .await
            .unwrap();
        assert!(result.winning_response.is_empty());
        assert_eq!(result.consensus_score, 0.0);
    }
}
