//! Recursive summarization: fold old rounds into incrementally-extended
//! summaries, keep recent rounds verbatim.

use super::{
    estimate_tokens, latest_round, message_tokens, rounds_present, ContextManager, ContextWindow,
    WindowStats,
};
use crate::client_wrapper::{ClientWrapper, CompletionOptions, Message};
use crate::deliberation::DeliberationMessage;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Summarise everything older than the last `preserve_recent_rounds` rounds.
///
/// Summaries are built incrementally in windows of `summarization_chunk_size`
/// rounds and cached by their end round: producing the summary for end-round
/// `R` reuses the cached summary at `R − chunk_size` and asks the LLM to
/// *extend* it with the intervening messages, so a long deliberation only ever
/// pays for the newest chunk.  If the combined projection still exceeds the
/// token budget, the first half of the preserved messages is recursively
/// compressed into a `[Compressed context]` system message until the window
/// fits or only two messages remain.
///
/// Without an LLM the manager degrades to a synthetic one-line summary naming
/// the covered rounds and participants.
pub struct RecursiveSummarizingManager {
    llm: Option<Arc<dyn ClientWrapper>>,
    max_tokens: Option<usize>,
    preserve_recent_rounds: u32,
    summarization_chunk_size: u32,
    /// Incremental summaries keyed by their end round.
    cache: Mutex<HashMap<u32, String>>,
}

impl RecursiveSummarizingManager {
    /// Manager backed by an LLM, preserving the 2 most recent rounds and
    /// summarising in 3-round chunks.
    pub fn new(llm: Arc<dyn ClientWrapper>) -> Self {
        Self {
            llm: Some(llm),
            max_tokens: None,
            preserve_recent_rounds: 2,
            summarization_chunk_size: 3,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Manager without an LLM; summaries are synthetic placeholders.
    pub fn without_llm() -> Self {
        Self {
            llm: None,
            max_tokens: None,
            preserve_recent_rounds: 2,
            summarization_chunk_size: 3,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cap the projection's estimated tokens (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Number of most-recent rounds kept verbatim (builder pattern).
    pub fn with_preserve_recent_rounds(mut self, rounds: u32) -> Self {
        self.preserve_recent_rounds = rounds;
        self
    }

    /// Rounds covered per incremental summary window (builder pattern).
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.summarization_chunk_size = chunk_size.max(1);
        self
    }

    fn render_rounds(transcript: &[DeliberationMessage], from: u32, to: u32) -> String {
        let mut out = String::new();
        for round in from..=to {
            for msg in transcript.iter().filter(|m| m.round == round) {
                let _ = writeln!(out, "[{} / round {}]: {}", msg.agent_name, round, msg.content);
            }
        }
        out
    }

    /// Synthetic summary used when no LLM is configured.
    fn synthetic_summary(transcript: &[DeliberationMessage], from: u32, to: u32) -> String {
        let in_range: Vec<&DeliberationMessage> = transcript
            .iter()
            .filter(|m| m.round >= from && m.round <= to)
            .collect();
        let mut participants: Vec<String> = in_range
            .iter()
            .map(|m| m.agent_name.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        participants.sort();
        format!(
            "[Summary of {} messages across rounds {}–{}. Participants: {}]",
            in_range.len(),
            from,
            to,
            participants.join(", ")
        )
    }

    /// Build (or reuse) the incremental summary covering rounds `1..=end_round`.
    fn summary_up_to<'a>(
        &'a self,
        transcript: &'a [DeliberationMessage],
        end_round: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            if end_round == 0 {
                return Ok(String::new());
            }
            if let Some(cached) = self.cache.lock().await.get(&end_round) {
                return Ok(cached.clone());
            }

            let chunk = self.summarization_chunk_size;
            let window_start = end_round.saturating_sub(chunk) + 1;
            let prior_end = end_round.saturating_sub(chunk);

            let summary = match &self.llm {
                None => Self::synthetic_summary(transcript, 1, end_round),
                Some(llm) => {
                    let prior = if prior_end >= 1 {
                        let cached = self.cache.lock().await.get(&prior_end).cloned();
                        match cached {
                            Some(s) => Some(s),
                            None => Some(self.summary_up_to(transcript, prior_end).await?),
                        }
                    } else {
                        None
                    };

                    let window_text = Self::render_rounds(transcript, window_start, end_round);
                    let prompt = match prior {
                        Some(prior) if !prior.is_empty() => format!(
                            "Here is a running summary of a multi-agent deliberation covering \
                             rounds 1–{}:\n{}\n\nExtend the summary to also cover rounds {}–{} \
                             below. Keep it concise and preserve each participant's position.\n\n{}",
                            prior_end, prior, window_start, end_round, window_text
                        ),
                        _ => format!(
                            "Summarize rounds {}–{} of a multi-agent deliberation. Keep it \
                             concise and preserve each participant's position.\n\n{}",
                            window_start, end_round, window_text
                        ),
                    };
                    let opts = CompletionOptions {
                        temperature: Some(0.3),
                        ..Default::default()
                    };
                    llm.complete(&[Message::user(prompt)], Some(&opts)).await?.content
                }
            };

            self.cache.lock().await.insert(end_round, summary.clone());
            Ok(summary)
        })
    }

    /// Compress the first half of `messages` into a `[Compressed context]`
    /// system message; repeats until under budget or ≤ 2 messages remain.
    async fn squeeze_to_budget(
        &self,
        mut messages: Vec<DeliberationMessage>,
        summary_tokens: usize,
        budget: usize,
        stats: &mut WindowStats,
    ) -> Result<Vec<DeliberationMessage>, EngineError> {
        loop {
            let total = summary_tokens
                + messages.iter().map(message_tokens).sum::<usize>();
            if total <= budget || messages.len() <= 2 {
                return Ok(messages);
            }

            // At least two messages fold per pass so the loop always shrinks.
            let half = (messages.len() / 2).max(2).min(messages.len() - 1);
            let (head, tail) = messages.split_at(half);

            let compressed_text = match &self.llm {
                Some(llm) => {
                    let mut text = String::new();
                    for msg in head {
                        let _ = writeln!(text, "[{}]: {}", msg.agent_name, msg.content);
                    }
                    let opts = CompletionOptions {
                        temperature: Some(0.3),
                        ..Default::default()
                    };
                    let prompt = format!(
                        "Compress the following deliberation excerpt into a short paragraph, \
                         preserving positions and decisions:\n\n{}",
                        text
                    );
                    llm.complete(&[Message::user(prompt)], Some(&opts)).await?.content
                }
                None => Self::synthetic_summary(head, head.first().map(|m| m.round).unwrap_or(1),
                    head.last().map(|m| m.round).unwrap_or(1)),
            };

            stats.summarized += head.len();
            let content = format!("[Compressed context] {}", compressed_text);
            let compressed = DeliberationMessage {
                agent_id: "system".to_string(),
                agent_name: "System".to_string(),
                token_count: estimate_tokens(&content),
                content,
                round: head.first().map(|m| m.round).unwrap_or(1),
                timestamp: head.first().map(|m| m.timestamp).unwrap_or_else(chrono::Utc::now),
                in_response_to: None,
            };

            let mut next = Vec::with_capacity(tail.len() + 1);
            next.push(compressed);
            next.extend_from_slice(tail);
            messages = next;
        }
    }
}

#[async_trait]
impl ContextManager for RecursiveSummarizingManager {
    async fn project(
        &self,
        transcript: &[DeliberationMessage],
        _recipient_id: &str,
    ) -> Result<ContextWindow, EngineError> {
        if transcript.is_empty() {
            return Ok(ContextWindow::default());
        }

        let current = latest_round(transcript);
        let summarize_up_to = current.saturating_sub(self.preserve_recent_rounds);

        let summary = if summarize_up_to >= 1 {
            let text = self.summary_up_to(transcript, summarize_up_to).await?;
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        } else {
            None
        };

        let mut stats = WindowStats::default();
        let preserved: Vec<DeliberationMessage> = transcript
            .iter()
            .filter(|m| m.round > summarize_up_to)
            .cloned()
            .collect();
        stats.summarized = transcript.len() - preserved.len();

        let summary_tokens = summary.as_deref().map(estimate_tokens).unwrap_or(0);
        let messages = match self.max_tokens {
            Some(budget) => {
                self.squeeze_to_budget(preserved, summary_tokens, budget, &mut stats)
                    .await?
            }
            None => preserved,
        };

        let estimated_tokens =
            summary_tokens + messages.iter().map(message_tokens).sum::<usize>();
        let retained = messages.len();
        stats.rounds_preserved = rounds_present(&messages);

        Ok(ContextWindow {
            estimated_tokens,
            original_count: transcript.len(),
            retained_count: retained.min(transcript.len()),
            stats,
            summary,
            messages,
        })
    }

    fn name(&self) -> &str {
        "RecursiveSummarizingManager"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::transcript;
    use super::*;

    #[tokio::test]
    async fn synthetic_fallback_names_rounds_and_participants() {
        let transcript = transcript(5, 2);
        let manager = RecursiveSummarizingManager::without_llm();
        let window = manager.project(&transcript, "a1").await.unwrap();

        let summary = window.summary.unwrap();
        assert!(summary.starts_with("[Summary of 6 messages across rounds 1–3."));
        assert!(summary.contains("Agent 1"));
        assert!(summary.contains("Agent 2"));
        // Rounds 4 and 5 preserved verbatim.
        assert_eq!(window.stats.rounds_preserved, vec![4, 5]);
        assert_eq!(window.stats.summarized, 6);
    }

    #[tokio::test]
    async fn recent_only_transcripts_skip_summarization() {
        let transcript = transcript(2, 2);
        let manager = RecursiveSummarizingManager::without_llm();
        let window = manager.project(&transcript, "a1").await.unwrap();
        assert!(window.summary.is_none());
        assert_eq!(window.messages.len(), 4);
    }

    #[tokio::test]
    async fn squeezing_stops_at_two_messages() {
        let transcript = transcript(6, 2);
        let manager = RecursiveSummarizingManager::without_llm().with_max_tokens(1);
        let window = manager.project(&transcript, "a1").await.unwrap();
        // Budget of one token is unsatisfiable; the squeeze loop must still
        // terminate with at most two original messages plus compression markers.
        assert!(window.messages.len() <= 2);
        assert!(window
            .messages
            .first()
            .map(|m| m.content.starts_with("[Compressed context]"))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn summaries_are_cached_by_end_round() {
        let transcript = transcript(8, 2);
        let manager = RecursiveSummarizingManager::without_llm();
        let _ = manager.project(&transcript, "a1").await.unwrap();
        assert!(manager.cache.lock().await.contains_key(&6));
    }
}
