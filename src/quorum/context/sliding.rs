//! Sliding-window projection: anchor rounds plus a newest-first greedy fill.

use super::{
    latest_round, message_tokens, rounds_present, ContextManager, ContextWindow, WindowStats,
};
use crate::deliberation::DeliberationMessage;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashSet;

/// Keep the opening round and the latest two rounds, then greedily add the rest
/// newest-first while the token and message budgets hold.
///
/// Round 1 usually carries the initial positions and the latest rounds the live
/// disagreement, so both ends of the transcript are anchored by default.  The
/// projection is idempotent: projecting an already-projected window returns the
/// same messages and token estimate.
///
/// # Example
///
/// ```rust
/// use quorum::context::SlidingWindowManager;
///
/// let manager = SlidingWindowManager::new()
///     .with_max_messages(12)
///     .with_max_tokens(4_000);
/// ```
#[derive(Debug, Clone)]
pub struct SlidingWindowManager {
    max_tokens: Option<usize>,
    max_messages: Option<usize>,
    preserve_first_round: bool,
    preserve_latest_round: bool,
}

impl Default for SlidingWindowManager {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_messages: None,
            preserve_first_round: true,
            preserve_latest_round: true,
        }
    }
}

impl SlidingWindowManager {
    /// Manager with both anchors enabled and no budgets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the projection's estimated tokens (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Cap the projection's message count (builder pattern).
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    /// Toggle the round-1 anchor (builder pattern).
    pub fn preserve_first_round(mut self, preserve: bool) -> Self {
        self.preserve_first_round = preserve;
        self
    }

    /// Toggle the latest-rounds anchor (builder pattern).
    pub fn preserve_latest_round(mut self, preserve: bool) -> Self {
        self.preserve_latest_round = preserve;
        self
    }
}

#[async_trait]
impl ContextManager for SlidingWindowManager {
    async fn project(
        &self,
        transcript: &[DeliberationMessage],
        _recipient_id: &str,
    ) -> Result<ContextWindow, EngineError> {
        if transcript.is_empty() {
            return Ok(ContextWindow::default());
        }

        let current = latest_round(transcript);
        let previous = current.saturating_sub(1);

        // Anchors, deduplicated by (agent, round, timestamp).
        let mut seen: HashSet<(String, u32, i64)> = HashSet::new();
        let mut included: Vec<usize> = Vec::new();
        let mut tokens = 0usize;

        fn dedupe_key(msg: &DeliberationMessage) -> (String, u32, i64) {
            (
                msg.agent_id.clone(),
                msg.round,
                msg.timestamp.timestamp_micros(),
            )
        }

        for (i, msg) in transcript.iter().enumerate() {
            let anchored = (self.preserve_first_round && msg.round == 1)
                || (self.preserve_latest_round
                    && (msg.round == current || (previous >= 1 && msg.round == previous)));
            if anchored && seen.insert(dedupe_key(msg)) {
                included.push(i);
                tokens += message_tokens(msg);
            }
        }

        // Greedy fill: remaining messages newest-first while budgets hold.
        'fill: for (i, msg) in transcript.iter().enumerate().rev() {
            if included.contains(&i) {
                continue;
            }
            if let Some(max_messages) = self.max_messages {
                if included.len() >= max_messages {
                    break 'fill;
                }
            }
            if let Some(max_tokens) = self.max_tokens {
                if tokens + message_tokens(msg) > max_tokens {
                    break 'fill;
                }
            }
            if seen.insert(dedupe_key(msg)) {
                included.push(i);
                tokens += message_tokens(msg);
            }
        }

        let mut messages: Vec<DeliberationMessage> =
            included.iter().map(|&i| transcript[i].clone()).collect();
        messages.sort_by(|a, b| (a.round, a.timestamp).cmp(&(b.round, b.timestamp)));

        let retained = messages.len();
        Ok(ContextWindow {
            estimated_tokens: tokens,
            original_count: transcript.len(),
            retained_count: retained,
            stats: WindowStats {
                dropped: transcript.len() - retained,
                summarized: 0,
                masked: 0,
                rounds_preserved: rounds_present(&messages),
            },
            summary: None,
            messages,
        })
    }

    fn name(&self) -> &str {
        "SlidingWindowManager"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::transcript;
    use super::*;

    #[tokio::test]
    async fn anchors_first_and_latest_rounds() {
        let transcript = transcript(5, 2);
        let manager = SlidingWindowManager::new().with_max_messages(6);
        let window = manager.project(&transcript, "a1").await.unwrap();

        assert_eq!(window.messages.len(), 6);
        assert_eq!(window.stats.rounds_preserved, vec![1, 4, 5]);
        assert!((window.compression_ratio() - 0.4).abs() < 1e-9);

        // Ascending (round, timestamp) order.
        for pair in window.messages.windows(2) {
            assert!((pair[0].round, pair[0].timestamp) <= (pair[1].round, pair[1].timestamp));
        }
    }

    #[tokio::test]
    async fn projection_is_idempotent() {
        let transcript = transcript(6, 2);
        let manager = SlidingWindowManager::new().with_max_tokens(60);

        let once = manager.project(&transcript, "a1").await.unwrap();
        let twice = manager.project(&once.messages, "a1").await.unwrap();

        assert_eq!(once.messages.len(), twice.messages.len());
        assert_eq!(once.estimated_tokens, twice.estimated_tokens);
        for (a, b) in once.messages.iter().zip(&twice.messages) {
            assert_eq!(a.agent_id, b.agent_id);
            assert_eq!(a.round, b.round);
            assert_eq!(a.timestamp, b.timestamp);
        }
    }

    #[tokio::test]
    async fn greedy_fill_respects_token_budget() {
        let transcript = transcript(8, 2);
        // Enough for the anchors plus a little.
        let anchor_tokens: usize = transcript
            .iter()
            .filter(|m| m.round == 1 || m.round >= 7)
            .map(message_tokens)
            .sum();
        let manager = SlidingWindowManager::new().with_max_tokens(anchor_tokens + 10);
        let window = manager.project(&transcript, "a1").await.unwrap();

        assert!(window.estimated_tokens <= anchor_tokens + 10);
        assert!(window.retained_count >= 6);
        assert!(window.retained_count <= window.original_count);
    }

    #[tokio::test]
    async fn duplicates_are_dropped() {
        let mut messages = transcript(2, 2);
        let dup = messages[0].clone();
        messages.push(dup);
        let window = SlidingWindowManager::new().project(&messages, "a1").await.unwrap();
        assert_eq!(window.messages.len(), 4);
    }
}
