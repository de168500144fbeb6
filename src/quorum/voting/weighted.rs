//! Weighted voting: buckets scored by agent weight × self-reported confidence.

use super::{bucket_responses, StrategyKind, VotingContext, VotingResult, VotingStrategy};
use crate::agent::AgentResponse;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Each response contributes `weight(agent) × confidence(agent)` to its answer
/// bucket; the bucket with the highest score wins.
///
/// Weights default to `1.0` (see [`VotingContext::weight_of`]) and missing
/// confidences default to [`Self::default_confidence`].  The consensus score is
/// `winner_score / Σ weights`, so with uniform weights and confidences the
/// strategy degenerates to simple majority.
#[derive(Debug)]
pub struct WeightedVoting {
    /// Confidence assumed for responses that carry none.
    pub default_confidence: f64,
}

impl Default for WeightedVoting {
    fn default() -> Self {
        Self {
            default_confidence: 1.0,
        }
    }
}

impl WeightedVoting {
    /// Weighted voting with the standard default confidence of `1.0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Weighted voting assuming the given confidence for unmarked responses.
    pub fn with_default_confidence(default_confidence: f64) -> Self {
        Self { default_confidence }
    }
}

#[async_trait]
impl VotingStrategy for WeightedVoting {
    async fn reconcile(
        &self,
        _task: &str,
        responses: &[AgentResponse],
        context: &VotingContext,
    ) -> Result<VotingResult, EngineError> {
        if responses.is_empty() {
            return Ok(VotingResult::empty(self.kind()));
        }

        let buckets = bucket_responses(responses);

        let mut vote_tally = BTreeMap::new();
        let mut scores = Vec::with_capacity(buckets.len());
        for (key, members) in &buckets {
            let score: f64 = members
                .iter()
                .map(|&i| {
                    let response = &responses[i];
                    context.weight_of(&response.agent_id)
                        * response.confidence.unwrap_or(self.default_confidence)
                })
                .sum();
            vote_tally.insert(key.clone(), members.len());
            scores.push(score);
        }

        let mut winner_idx = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[winner_idx] {
                winner_idx = i;
            }
        }

        let total_weight: f64 = responses
            .iter()
            .map(|r| context.weight_of(&r.agent_id))
            .sum();
        let consensus_score = if total_weight > 0.0 {
            (scores[winner_idx] / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let representative = &responses[buckets[winner_idx].1[0]];
        Ok(VotingResult {
            winning_response: representative.content.clone(),
            winning_structured: representative.structured.clone(),
            winning_agent_id: representative.agent_id.clone(),
            strategy: self.kind(),
            vote_tally,
            consensus_score,
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Weighted
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_response;
    use super::*;

    #[tokio::test]
    async fn expert_weight_beats_headcount() {
        let responses = vec![
            test_response("expert", "A"),
            test_response("novice1", "B"),
            test_response("novice2", "B"),
        ];
        let context = VotingContext::new()
            .with_weight("expert", 3.0)
            .with_weight("novice1", 1.0)
            .with_weight("novice2", 1.0);

        let result = WeightedVoting::new()
            .reconcile("q", &responses, &context)
            .await
            .unwrap();
        assert_eq!(result.winning_response, "A");
        assert_eq!(result.winning_agent_id, "expert");
        // 3.0 of 5.0 total weight.
        assert!((result.consensus_score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn uniform_weights_match_majority() {
        let responses = vec![
            test_response("a1", "yes"),
            test_response("a2", "yes"),
            test_response("a3", "no"),
        ];
        let result = WeightedVoting::new()
            .reconcile("q", &responses, &VotingContext::new())
            .await
            .unwrap();
        assert_eq!(result.winning_response, "yes");
        assert!((result.consensus_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn confidence_scales_contribution() {
        let mut low_confidence = test_response("a1", "yes");
        low_confidence.confidence = Some(0.1);
        let mut high_confidence = test_response("a2", "no");
        high_confidence.confidence = Some(0.9);

        let result = WeightedVoting::new()
            .reconcile("q", &[low_confidence, high_confidence], &VotingContext::new())
            .await
            .unwrap();
        assert_eq!(result.winning_response, "no");
    }
}
