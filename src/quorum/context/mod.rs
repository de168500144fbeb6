//! Context-window management for long deliberation transcripts.
//!
//! A [`ContextManager`] projects the full transcript down to a bounded
//! [`ContextWindow`] for one recipient agent before each of its turns.  Five
//! policies are provided:
//!
//! - [`SlidingWindowManager`](sliding::SlidingWindowManager) — keep the first and
//!   latest rounds, greedily fill the rest newest-first.
//! - [`RecursiveSummarizingManager`](summarizing::RecursiveSummarizingManager) —
//!   LLM-summarise old rounds incrementally, preserve recent rounds verbatim.
//! - [`HierarchicalManager`](hierarchical::HierarchicalManager) — segment the
//!   discussion into named phases with per-phase and global summaries.
//! - [`ObservationMaskingManager`](masking::ObservationMaskingManager) — replace
//!   verbose or matching messages with condensed forms.
//! - [`HybridContextManager`](hybrid::HybridContextManager) — pick a pipeline of
//!   the above based on how far the transcript exceeds the budget.
//!
//! Token counts are estimated at `⌈chars / 4⌉` unless a message carries a
//! provider-reported count (see [`message_tokens`]).

pub mod hierarchical;
pub mod hybrid;
pub mod masking;
pub mod sliding;
pub mod summarizing;

pub use hierarchical::{HierarchicalManager, PhaseNaming};
pub use hybrid::HybridContextManager;
pub use masking::{MaskingConfig, MaskingStrategy, ObservationMaskingManager};
pub use sliding::SlidingWindowManager;
pub use summarizing::RecursiveSummarizingManager;

use crate::deliberation::DeliberationMessage;
use crate::error::EngineError;
use async_trait::async_trait;

/// Aggregate bookkeeping about what a projection did.
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    /// Messages dropped entirely.
    pub dropped: usize,
    /// Messages folded into a summary.
    pub summarized: usize,
    /// Messages whose content was masked or condensed in place.
    pub masked: usize,
    /// Rounds represented verbatim in the projected window, ascending.
    pub rounds_preserved: Vec<u32>,
}

/// The bounded view of a transcript handed to one agent for one round.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    /// Projected messages, ascending by `(round, timestamp)`.
    pub messages: Vec<DeliberationMessage>,
    /// Summary text covering messages that were folded away, if any.
    pub summary: Option<String>,
    /// Estimated tokens of the projection (messages plus summary).
    pub estimated_tokens: usize,
    /// Number of messages in the source transcript.
    pub original_count: usize,
    /// Number of messages retained verbatim (or masked in place).
    pub retained_count: usize,
    /// What happened to the rest.
    pub stats: WindowStats,
}

impl ContextWindow {
    /// Fraction of the transcript that was compressed away:
    /// `1 − retained / original`, or `0.0` for an empty transcript.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_count == 0 {
            0.0
        } else {
            1.0 - self.retained_count as f64 / self.original_count as f64
        }
    }
}

/// Strategy interface shaping the transcript each agent observes.
#[async_trait]
pub trait ContextManager: Send + Sync {
    /// Project the transcript for the given recipient.
    ///
    /// The estimated token count of the result must not exceed the manager's
    /// configured budget when one was supplied, and `retained_count` never
    /// exceeds `original_count`.
    async fn project(
        &self,
        transcript: &[DeliberationMessage],
        recipient_id: &str,
    ) -> Result<ContextWindow, EngineError>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;
}

/// Estimate tokens for a plain string: `⌈chars / 4⌉`, minimum 1 for non-empty.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Tokens for a transcript message: its carried count when known, otherwise
/// estimated from the content length.
pub fn message_tokens(msg: &DeliberationMessage) -> usize {
    if msg.token_count > 0 {
        msg.token_count
    } else {
        estimate_tokens(&msg.content)
    }
}

/// Sum of [`message_tokens`] over a slice.
pub fn transcript_tokens(messages: &[DeliberationMessage]) -> usize {
    messages.iter().map(message_tokens).sum()
}

/// The highest round number present, `0` for an empty transcript.
pub(crate) fn latest_round(messages: &[DeliberationMessage]) -> u32 {
    messages.iter().map(|m| m.round).max().unwrap_or(0)
}

/// Ascending, deduplicated list of rounds present in a projection.
pub(crate) fn rounds_present(messages: &[DeliberationMessage]) -> Vec<u32> {
    let mut rounds: Vec<u32> = messages.iter().map(|m| m.round).collect();
    rounds.sort_unstable();
    rounds.dedup();
    rounds
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    /// Build a deterministic transcript: `agents_per_round` agents speaking in
    /// each of rounds `1..=rounds`, timestamps strictly increasing.
    pub fn transcript(rounds: u32, agents_per_round: usize) -> Vec<DeliberationMessage> {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut messages = Vec::new();
        let mut tick = 0i64;
        for round in 1..=rounds {
            for agent in 0..agents_per_round {
                tick += 1;
                messages.push(DeliberationMessage {
                    agent_id: format!("a{}", agent + 1),
                    agent_name: format!("Agent {}", agent + 1),
                    content: format!("round {} position from agent {}", round, agent + 1),
                    round,
                    timestamp: base + ChronoDuration::seconds(tick),
                    in_response_to: None,
                    token_count: 0,
                });
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimation_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn carried_token_counts_win() {
        let mut msg = testing::transcript(1, 1).pop().unwrap();
        msg.token_count = 99;
        assert_eq!(message_tokens(&msg), 99);
        msg.token_count = 0;
        assert_eq!(message_tokens(&msg), estimate_tokens(&msg.content));
    }

    #[test]
    fn compression_ratio_of_empty_window() {
        assert_eq!(ContextWindow::default().compression_ratio(), 0.0);
    }
}
