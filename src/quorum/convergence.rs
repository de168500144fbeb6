//! Convergence scoring for multi-round deliberations.
//!
//! Both calculators share one contract: map a [`DeliberationState`] to a score in
//! `[0, 1]` describing how similar this round's agent positions are to the
//! previous round's.  Convergence is always evaluated **after** the current
//! round's messages are fully appended to the transcript; before round 2 there
//! is nothing to compare and both implementations return `0.0`.
//!
//! - [`TokenSimilarityCalculator`] — deterministic Jaccard similarity over word
//!   sets, no LLM calls.
//! - [`LlmJudgeCalculator`] — asks an arbiter model to score agreement directly.

use crate::client_wrapper::{ClientWrapper, CompletionOptions, Message};
use crate::deliberation::DeliberationState;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

/// Strategy interface for convergence scoring.
#[async_trait]
pub trait ConvergenceCalculator: Send + Sync {
    /// Score the similarity between the last two completed rounds, in `[0, 1]`.
    async fn score(&self, state: &DeliberationState) -> Result<f64, EngineError>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;
}

/// Deterministic convergence via Jaccard similarity on word sets.
///
/// For each agent that spoke in both of the last two rounds, the agent's
/// round-`r` message is compared with its round-`r−1` message; the score is the
/// mean across those agents.  Identical consecutive messages score `1.0`, fully
/// disjoint token sets score `0.0`.
#[derive(Debug, Default)]
pub struct TokenSimilarityCalculator;

impl TokenSimilarityCalculator {
    /// Create the calculator.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConvergenceCalculator for TokenSimilarityCalculator {
    async fn score(&self, state: &DeliberationState) -> Result<f64, EngineError> {
        if state.current_round < 2 {
            return Ok(0.0);
        }
        let current = state.current_round;
        let previous = current - 1;

        let mut total = 0.0;
        let mut compared = 0usize;
        for agent_id in &state.agent_ids {
            let prev_msg = state.last_message_of(agent_id, previous);
            let curr_msg = state.last_message_of(agent_id, current);
            if let (Some(prev), Some(curr)) = (prev_msg, curr_msg) {
                total += jaccard_similarity(&prev.content, &curr.content);
                compared += 1;
            }
        }

        if compared == 0 {
            Ok(0.0)
        } else {
            Ok(total / compared as f64)
        }
    }

    fn name(&self) -> &str {
        "TokenSimilarityCalculator"
    }
}

/// Calculate Jaccard similarity between two texts based on normalised word sets.
///
/// Words shorter than 3 characters are ignored to reduce noise from articles
/// and prepositions.  Both inputs are lowercased and split on whitespace and
/// punctuation before comparison.  Returns `1.0` when both texts are empty,
/// `0.0` when only one is empty.
pub fn jaccard_similarity(text1: &str, text2: &str) -> f64 {
    let words1 = token_set(text1);
    let words2 = token_set(text2);

    if words1.is_empty() && words2.is_empty() {
        return 1.0;
    }
    if words1.is_empty() || words2.is_empty() {
        return 0.0;
    }

    let intersection = words1.intersection(&words2).count();
    let union = words1.union(&words2).count();
    intersection as f64 / union as f64
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

/// LLM-scored convergence judgement.
///
/// Sends the task and the last two rounds of the transcript to an arbiter at
/// temperature 0.1 with a 10-token cap, then parses a single number from the
/// reply.  The parsed value is clamped to `[0, 1]`; a reply with no parseable
/// number scores `0.5`.
pub struct LlmJudgeCalculator {
    arbiter: Arc<dyn ClientWrapper>,
}

impl LlmJudgeCalculator {
    /// Create the calculator around an arbiter client.
    pub fn new(arbiter: Arc<dyn ClientWrapper>) -> Self {
        Self { arbiter }
    }

    fn build_prompt(state: &DeliberationState) -> String {
        let current = state.current_round;
        let mut prompt = format!(
            "Task under deliberation:\n{}\n\nLast two rounds of discussion:\n",
            state.task
        );
        for round in [current - 1, current] {
            let _ = write!(prompt, "\n--- Round {} ---\n", round);
            for msg in state.messages_in_round(round) {
                let _ = write!(prompt, "[{}]: {}\n", msg.agent_name, msg.content);
            }
        }
        prompt.push_str(
            "\nOn a scale from 0.0 (positions fully disagree) to 1.0 (positions fully agree), \
             how converged are the participants? Reply with a single number.",
        );
        prompt
    }
}

#[async_trait]
impl ConvergenceCalculator for LlmJudgeCalculator {
    async fn score(&self, state: &DeliberationState) -> Result<f64, EngineError> {
        if state.current_round < 2 {
            return Ok(0.0);
        }

        let opts = CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(10),
            ..Default::default()
        };
        let response = self
            .arbiter
            .complete(&[Message::user(Self::build_prompt(state))], Some(&opts))
            .await?;

        Ok(parse_score(&response.content))
    }

    fn name(&self) -> &str {
        "LlmJudgeCalculator"
    }
}

/// First parseable number in `content`, clamped to `[0, 1]`; `0.5` when absent.
pub(crate) fn parse_score(content: &str) -> f64 {
    first_number(content).map(|n| n.clamp(0.0, 1.0)).unwrap_or(0.5)
}

/// Scan for the first decimal number in free-form text.
pub(crate) fn first_number(content: &str) -> Option<f64> {
    let mut current = String::new();
    for ch in content.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() || (ch == '.' && !current.is_empty() && !current.contains('.')) {
            current.push(ch);
        } else {
            if !current.is_empty() {
                if let Ok(n) = current.trim_end_matches('.').parse::<f64>() {
                    return Some(n);
                }
            }
            current.clear();
        }
    }
    None
}
