//! Aggregation: combine every response into one comprehensive answer.

use super::{format_numbered, StrategyKind, VotingContext, VotingResult, VotingStrategy};
use super::AGGREGATION_AGENT_ID;
use crate::agent::AgentResponse;
use crate::client_wrapper::{CompletionOptions, Message};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Merge all responses rather than pick one.
///
/// With an arbiter, a single pass at temperature 0.3 combines the numbered
/// responses into one comprehensive answer (removing redundancy, preserving
/// nuance).  Without one, the responses are concatenated as `[name]: response`
/// blocks separated by `---`.  Either way the winner carries the sentinel
/// agent id [`AGGREGATION_AGENT_ID`] and a consensus
/// score of `1.0` — aggregation never disagrees with itself.
#[derive(Debug, Default)]
pub struct AggregationVoting;

#[async_trait]
impl VotingStrategy for AggregationVoting {
    async fn reconcile(
        &self,
        task: &str,
        responses: &[AgentResponse],
        context: &VotingContext,
    ) -> Result<VotingResult, EngineError> {
        if responses.is_empty() {
            return Ok(VotingResult::empty(self.kind()));
        }

        let mut vote_tally = BTreeMap::new();
        for response in responses {
            vote_tally.insert(response.agent_id.clone(), 1);
        }

        let combined = match &context.arbiter {
            Some(arbiter) => {
                let prompt = format!(
                    "Task:\n{}\n\nResponses from the participants:\n{}\
                     Combine these into one comprehensive answer. Remove redundancy, \
                     preserve every distinct nuance, and attribute nothing.",
                    task,
                    format_numbered(responses)
                );
                let opts = CompletionOptions {
                    temperature: Some(0.3),
                    ..Default::default()
                };
                arbiter
                    .complete(&[Message::user(prompt)], Some(&opts))
                    .await?
                    .content
            }
            None => {
                let mut combined = String::new();
                for (i, response) in responses.iter().enumerate() {
                    if i > 0 {
                        combined.push_str("\n---\n");
                    }
                    let _ = write!(combined, "[{}]: {}", response.agent_name, response.content);
                }
                combined
            }
        };

        Ok(VotingResult {
            winning_response: combined,
            winning_structured: None,
            winning_agent_id: AGGREGATION_AGENT_ID.to_string(),
            strategy: self.kind(),
            vote_tally,
            consensus_score: 1.0,
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Aggregation
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_response;
    use super::*;

    #[tokio::test]
    async fn fallback_concatenates_with_separators() {
        let responses = vec![
            test_response("a1", "first view"),
            test_response("a2", "second view"),
        ];
        let result = AggregationVoting
            .reconcile("q", &responses, &VotingContext::new())
            .await
            .unwrap();

        assert_eq!(result.winning_agent_id, AGGREGATION_AGENT_ID);
        assert_eq!(result.consensus_score, 1.0);
        assert!(result.winning_response.contains("[a1]: first view"));
        assert!(result.winning_response.contains("---"));
        assert!(result.winning_response.contains("[a2]: second view"));
    }
}
