//! Expert panel: an arbiter scores every response on five quality dimensions.

use super::{StrategyKind, VotingContext, VotingResult, VotingStrategy, WeightedVoting};
use super::all_numbers;
use crate::agent::AgentResponse;
use crate::client_wrapper::{CompletionOptions, Message};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Evaluate each response independently on accuracy, completeness, clarity,
/// relevance, and insight (each in `[0, 1]`), then crown the highest mean.
///
/// Every in-range number in the arbiter's reply participates in the mean; a
/// reply with no parseable numbers scores `0.5`.  The tally reports each
/// agent's score relative to the winner as `round(100 × score / max)`.
/// Without an arbiter the strategy falls back to weighted voting with a
/// default confidence of `0.5`.
#[derive(Debug, Default)]
pub struct ExpertPanelVoting;

#[async_trait]
impl VotingStrategy for ExpertPanelVoting {
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
            log::debug!("expert panel: no arbiter configured, falling back to weighted voting");
            let mut result = WeightedVoting::with_default_confidence(0.5)
                .reconcile(task, responses, context)
                .await?;
            result.strategy = self.kind();
            return Ok(result);
        };

        let opts = CompletionOptions {
            temperature: Some(0.1),
            ..Default::default()
        };

        let mut scores = Vec::with_capacity(responses.len());
        for response in responses {
            let prompt = format!(
                "Task:\n{}\n\nResponse from {}:\n{}\n\n\
                 Rate this response on five dimensions — accuracy, completeness, clarity, \
                 relevance, insight — each as a number between 0.0 and 1.0. \
                 Reply with the five numbers.",
                task, response.agent_name, response.content
            );
            let reply = arbiter.complete(&[Message::user(prompt)], Some(&opts)).await?;

            let ratings: Vec<f64> = all_numbers(&reply.content)
                .into_iter()
                .filter(|n| (0.0..=1.0).contains(n))
                .collect();
            let score = if ratings.is_empty() {
                0.5
            } else {
                ratings.iter().sum::<f64>() / ratings.len() as f64
            };
            scores.push(score);
        }

        let mut winner_idx = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[winner_idx] {
                winner_idx = i;
            }
        }
        let max_score = scores[winner_idx];

        let mut vote_tally = BTreeMap::new();
        for (response, score) in responses.iter().zip(&scores) {
            let relative = if max_score > 0.0 {
                (100.0 * score / max_score).round() as usize
            } else {
                0
            };
            vote_tally.insert(response.agent_id.clone(), relative);
        }

        let winner = &responses[winner_idx];
        Ok(VotingResult {
            winning_response: winner.content.clone(),
            winning_structured: winner.structured.clone(),
            winning_agent_id: winner.agent_id.clone(),
            strategy: self.kind(),
            vote_tally,
            consensus_score: max_score.clamp(0.0, 1.0),
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ExpertPanel
    }
}
