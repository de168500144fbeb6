//! Hybrid projection: pick a pipeline based on how far the transcript
//! overshoots the budget.

use super::masking::{MaskingConfig, ObservationMaskingManager};
use super::sliding::SlidingWindowManager;
use super::summarizing::RecursiveSummarizingManager;
use super::{latest_round, transcript_tokens, ContextManager, ContextWindow};
use crate::client_wrapper::ClientWrapper;
use crate::deliberation::DeliberationMessage;
use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;

/// Auto-select among sliding, masking, and recursive summarization.
///
/// The compression factor is `transcript_tokens / budget`:
///
/// - `≤ 1.5` — sliding window alone is enough.
/// - `≤ 2.5` — mask first, then slide.
/// - otherwise, when the discussion is long (more than 5 rounds) and a
///   summarizer is available — mask then summarise recursively.
/// - otherwise — the full pipeline (mask → summarise → slide), short-circuiting
///   as soon as an intermediate output fits the budget.
pub struct HybridContextManager {
    max_tokens: usize,
    sliding: SlidingWindowManager,
    masking: ObservationMaskingManager,
    recursive: Option<RecursiveSummarizingManager>,
}

impl HybridContextManager {
    /// Hybrid manager with the given token budget and no summarizer.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            sliding: SlidingWindowManager::new().with_max_tokens(max_tokens),
            masking: ObservationMaskingManager::new(MaskingConfig::default()),
            recursive: None,
        }
    }

    /// Attach an LLM enabling the recursive-summarization stages (builder pattern).
    pub fn with_summarizer(mut self, llm: Arc<dyn ClientWrapper>) -> Self {
        self.recursive =
            Some(RecursiveSummarizingManager::new(llm).with_max_tokens(self.max_tokens));
        self
    }

    /// Override the masking configuration (builder pattern).
    pub fn with_masking_config(mut self, config: MaskingConfig) -> Self {
        self.masking = ObservationMaskingManager::new(config);
        self
    }

    fn merge_into(base: &mut ContextWindow, stage: ContextWindow) {
        base.stats.dropped += stage.stats.dropped;
        base.stats.summarized += stage.stats.summarized;
        base.stats.masked += stage.stats.masked;
        base.stats.rounds_preserved = stage.stats.rounds_preserved;
        if stage.summary.is_some() {
            base.summary = stage.summary;
        }
        base.messages = stage.messages;
        base.estimated_tokens = stage.estimated_tokens;
        base.retained_count = stage.retained_count;
    }
}

#[async_trait]
impl ContextManager for HybridContextManager {
    async fn project(
        &self,
        transcript: &[DeliberationMessage],
        recipient_id: &str,
    ) -> Result<ContextWindow, EngineError> {
        if transcript.is_empty() {
            return Ok(ContextWindow::default());
        }

        let tokens = transcript_tokens(transcript);
        let factor = tokens as f64 / self.max_tokens.max(1) as f64;
        let rounds = latest_round(transcript);

        log::debug!(
            "hybrid context: {} tokens over budget {} (factor {:.2}, {} rounds)",
            tokens,
            self.max_tokens,
            factor,
            rounds
        );

        if factor <= 1.5 {
            return self.sliding.project(transcript, recipient_id).await;
        }

        if factor <= 2.5 {
            let masked = self.masking.project(transcript, recipient_id).await?;
            let mut result = ContextWindow {
                original_count: transcript.len(),
                ..Default::default()
            };
            result.stats.masked = masked.stats.masked;
            let slid = self.sliding.project(&masked.messages, recipient_id).await?;
            Self::merge_into(&mut result, slid);
            return Ok(result);
        }

        if rounds > 5 {
            if let Some(recursive) = &self.recursive {
                let masked = self.masking.project(transcript, recipient_id).await?;
                let mut result = ContextWindow {
                    original_count: transcript.len(),
                    ..Default::default()
                };
                result.stats.masked = masked.stats.masked;
                let summarized = recursive.project(&masked.messages, recipient_id).await?;
                Self::merge_into(&mut result, summarized);
                return Ok(result);
            }
        }

        // Full pipeline with short-circuiting.
        let mut result = ContextWindow {
            original_count: transcript.len(),
            ..Default::default()
        };
        let masked = self.masking.project(transcript, recipient_id).await?;
        result.stats.masked = masked.stats.masked;
        result.messages = masked.messages;
        result.estimated_tokens = masked.estimated_tokens;
        result.retained_count = result.messages.len();
        result.stats.rounds_preserved = masked.stats.rounds_preserved;
        if result.estimated_tokens <= self.max_tokens {
            return Ok(result);
        }

        if let Some(recursive) = &self.recursive {
            let summarized = recursive.project(&result.messages.clone(), recipient_id).await?;
            Self::merge_into(&mut result, summarized);
            if result.estimated_tokens <= self.max_tokens {
                return Ok(result);
            }
        }

        let slid = self.sliding.project(&result.messages.clone(), recipient_id).await?;
        Self::merge_into(&mut result, slid);
        Ok(result)
    }

    fn name(&self) -> &str {
        "HybridContextManager"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::transcript;
    use super::*;

    #[tokio::test]
    async fn small_transcripts_use_sliding_only() {
        let transcript = transcript(3, 2);
        let manager = HybridContextManager::new(10_000);
        let window = manager.project(&transcript, "a1").await.unwrap();
        assert_eq!(window.stats.masked, 0);
        assert!(window.summary.is_none());
        assert_eq!(window.messages.len(), 6);
    }

    #[tokio::test]
    async fn moderate_pressure_masks_then_slides() {
        let mut msgs = transcript(6, 2);
        // Inflate the early rounds so the factor lands between 1.5 and 2.5.
        for msg in msgs.iter_mut().filter(|m| m.round <= 3) {
            msg.content = "detail ".repeat(100).trim_end().to_string();
        }
        let total = transcript_tokens(&msgs);
        let budget = (total as f64 / 2.0) as usize;
        let manager = HybridContextManager::new(budget);

        let window = manager.project(&msgs, "a1").await.unwrap();
        assert!(window.stats.masked > 0, "expected masking to run");
        assert!(window.estimated_tokens <= budget);
    }
}
