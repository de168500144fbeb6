//! Consensus building: an arbiter synthesises one unified answer and scores it.

use super::{format_numbered, StrategyKind, VotingContext, VotingResult, VotingStrategy};
use super::CONSENSUS_AGENT_ID;
use crate::agent::AgentResponse;
use crate::client_wrapper::{CompletionOptions, Message};
use crate::convergence::parse_score;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Two arbiter passes: synthesise a unified response from the numbered inputs
/// (temperature 0.3), then score how well the synthesis represents the
/// originals on a 0.0–1.0 scale (temperature 0.0).
///
/// The winner carries the sentinel agent id
/// [`CONSENSUS_AGENT_ID`].  Without an arbiter the
/// strategy falls back to the first response with a consensus score of `1/N` —
/// this fallback may sit below a workflow's required threshold, in which case
/// no further retry is attempted.
#[derive(Debug, Default)]
pub struct ConsensusVoting;

#[async_trait]
impl VotingStrategy for ConsensusVoting {
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

        let Some(arbiter) = &context.arbiter else {
            log::debug!("consensus: no arbiter configured, falling back to first response");
            let first = &responses[0];
            return Ok(VotingResult {
                winning_response: first.content.clone(),
                winning_structured: first.structured.clone(),
                winning_agent_id: first.agent_id.clone(),
                strategy: self.kind(),
                vote_tally,
                consensus_score: 1.0 / responses.len() as f64,
            });
        };

        // Pass 1: synthesis.
        let synthesis_prompt = format!(
            "Task:\n{}\n\nResponses from the participants:\n{}\
             Synthesize these into a single unified response that the participants \
             could all stand behind. Preserve points of agreement, reconcile \
             disagreements explicitly, and do not introduce new claims.",
            task,
            format_numbered(responses)
        );
        let synthesis_opts = CompletionOptions {
            temperature: Some(0.3),
            system_prompt: Some(
                "You are a consensus builder reconciling multiple expert responses into one."
                    .to_string(),
            ),
            ..Default::default()
        };
        let synthesis = arbiter
            .complete(&[Message::user(synthesis_prompt)], Some(&synthesis_opts))
            .await?;

        // Pass 2: score the synthesis against the originals.
        let scoring_prompt = format!(
            "Original responses:\n{}\nSynthesis:\n{}\n\n\
             On a scale from 0.0 to 1.0, how faithfully does the synthesis represent \
             the original responses? Reply with a single number.",
            format_numbered(responses),
            synthesis.content
        );
        let scoring_opts = CompletionOptions {
            temperature: Some(0.0),
            ..Default::default()
        };
        let scoring = arbiter
            .complete(&[Message::user(scoring_prompt)], Some(&scoring_opts))
            .await?;

        Ok(VotingResult {
            winning_response: synthesis.content,
            winning_structured: None,
            winning_agent_id: CONSENSUS_AGENT_ID.to_string(),
            strategy: self.kind(),
            vote_tally,
            consensus_score: parse_score(&scoring.content),
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Consensus
    }
}
