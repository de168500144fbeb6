//! Observation masking: condense verbose or low-signal messages in place.

use super::{
    estimate_tokens, latest_round, message_tokens, rounds_present, ContextManager, ContextWindow,
    WindowStats,
};
use crate::client_wrapper::{ClientWrapper, CompletionOptions, Message};
use crate::deliberation::DeliberationMessage;
use crate::error::EngineError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

/// How a masked message's content is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskingStrategy {
    /// Keep whole sentences up to the length cap, append ` [truncated]`.
    #[default]
    Truncate,
    /// Strip filler phrases; append ` [condensed]` when that halves the message.
    RemoveVerbose,
    /// Ask an LLM for at most three bullet points.
    ExtractKeyPoints,
    /// Replace the message with a one-line placeholder.
    Placeholder,
    /// RemoveVerbose first; fall through to ExtractKeyPoints when still long.
    Hybrid,
}

/// Phrases that mark a message as decision-bearing; such messages are never
/// masked regardless of length.
const DECISION_INDICATORS: [&str; 8] = [
    "i conclude",
    "final answer",
    "my position is",
    "i recommend",
    "in conclusion",
    "my recommendation",
    "i vote",
    "we should therefore",
];

lazy_static! {
    /// Filler phrasing stripped by [`MaskingStrategy::RemoveVerbose`].
    static ref FILLER_PATTERNS: Vec<Regex> = [
        r"(?i)\bas i mentioned(?: (?:earlier|before|above))?,?\s*",
        r"(?i)\bto elaborate,?\s*",
        r"(?i)\bin other words,?\s*",
        r"(?i)\blet me explain[.:]?\s*",
        r"(?i)\bfor example,?\s*",
        r"(?i)\bto clarify,?\s*",
        r"(?i)\bwhat i mean is,?\s*",
        r"(?i)\bspecifically,?\s*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("filler pattern compiles"))
    .collect();
}

/// Knobs governing which messages get masked and how.
#[derive(Clone)]
pub struct MaskingConfig {
    /// Messages in the most recent N rounds are never masked.
    pub preserve_recent_rounds: u32,
    /// Never mask the recipient's own messages.
    pub preserve_own_messages: bool,
    /// Agents whose messages are never masked.
    pub always_preserve_agents: HashSet<String>,
    /// Mask messages whose token count exceeds this.
    pub verbosity_threshold: usize,
    /// Mask messages matching any of these patterns.
    pub mask_patterns: Vec<Regex>,
    /// Mask every eligible message regardless of length or pattern.
    pub mask_by_default: bool,
    /// Character cap used by the truncating strategies.
    pub max_masked_length: usize,
    /// The rewriting strategy.
    pub strategy: MaskingStrategy,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            preserve_recent_rounds: 2,
            preserve_own_messages: true,
            always_preserve_agents: HashSet::new(),
            verbosity_threshold: 150,
            mask_patterns: Vec::new(),
            mask_by_default: false,
            max_masked_length: 200,
            strategy: MaskingStrategy::Truncate,
        }
    }
}

/// Rewrite old, verbose, or pattern-matching messages into condensed forms.
///
/// A message is never masked when it is recent, the recipient's own, from an
/// always-preserved agent, or decision-bearing (contains phrases like
/// "final answer" or "my position is").  Everything else is masked when it
/// exceeds the verbosity threshold, matches a configured pattern, or
/// `mask_by_default` is set.
pub struct ObservationMaskingManager {
    config: MaskingConfig,
    llm: Option<Arc<dyn ClientWrapper>>,
}

impl ObservationMaskingManager {
    /// Manager with the default config and no LLM (the
    /// [`ExtractKeyPoints`](MaskingStrategy::ExtractKeyPoints) strategy then
    /// degrades to truncation).
    pub fn new(config: MaskingConfig) -> Self {
        Self { config, llm: None }
    }

    /// Attach an LLM for the key-point extraction strategy (builder pattern).
    pub fn with_llm(mut self, llm: Arc<dyn ClientWrapper>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Whether `msg` should be masked for `recipient` given the latest round.
    fn should_mask(&self, msg: &DeliberationMessage, recipient: &str, current_round: u32) -> bool {
        let cfg = &self.config;
        if msg.round + cfg.preserve_recent_rounds > current_round {
            return false;
        }
        if cfg.preserve_own_messages && msg.agent_id == recipient {
            return false;
        }
        if cfg.always_preserve_agents.contains(&msg.agent_id) {
            return false;
        }
        if contains_decision_indicator(&msg.content) {
            return false;
        }
        // A message with no carried count is estimated from content length.
        if message_tokens(msg) > cfg.verbosity_threshold {
            return true;
        }
        if cfg.mask_patterns.iter().any(|p| p.is_match(&msg.content)) {
            return true;
        }
        cfg.mask_by_default
    }

    async fn mask_content(&self, msg: &DeliberationMessage) -> Result<String, EngineError> {
        match self.config.strategy {
            MaskingStrategy::Truncate => Ok(truncate_sentences(
                &msg.content,
                self.config.max_masked_length,
            )),
            MaskingStrategy::RemoveVerbose => Ok(remove_verbose(&msg.content)),
            MaskingStrategy::ExtractKeyPoints => self.extract_key_points(msg).await,
            MaskingStrategy::Placeholder => Ok(placeholder(msg)),
            MaskingStrategy::Hybrid => {
                let condensed = remove_verbose(&msg.content);
                if estimate_tokens(&condensed) > self.config.max_masked_length / 4 {
                    self.extract_key_points(msg).await
                } else {
                    Ok(condensed)
                }
            }
        }
    }

    async fn extract_key_points(&self, msg: &DeliberationMessage) -> Result<String, EngineError> {
        let Some(llm) = &self.llm else {
            return Ok(truncate_sentences(&msg.content, self.config.max_masked_length));
        };
        let prompt = format!(
            "Extract at most 3 bullet points capturing the essential claims of this \
             message:\n\n{}",
            msg.content
        );
        let opts = CompletionOptions {
            temperature: Some(0.2),
            max_tokens: Some(150),
            ..Default::default()
        };
        let reply = llm.complete(&[Message::user(prompt)], Some(&opts)).await?;
        Ok(format!("[Key points from {}]\n{}", msg.agent_name, reply.content))
    }
}

/// Whether the content carries any decision-marking phrase.
fn contains_decision_indicator(content: &str) -> bool {
    let lower = content.to_lowercase();
    DECISION_INDICATORS.iter().any(|phrase| lower.contains(phrase))
}

/// Keep whole sentences up to `max_length - 20` characters, then append
/// ` [truncated]`.  Falls back to a hard character cut when not even the first
/// sentence fits.
fn truncate_sentences(content: &str, max_length: usize) -> String {
    let limit = max_length.saturating_sub(20);
    if content.len() <= limit {
        return content.to_string();
    }

    let mut kept = 0usize;
    let bytes = content.as_bytes();
    let mut last_sentence_end = 0usize;
    while kept < content.len() {
        let ch = bytes[kept];
        if (ch == b'.' || ch == b'!' || ch == b'?')
            && content[kept + 1..].chars().next().map_or(true, |c| c.is_whitespace())
        {
            if kept + 1 > limit {
                break;
            }
            last_sentence_end = kept + 1;
        }
        kept += 1;
    }

    let cut = if last_sentence_end > 0 {
        last_sentence_end
    } else {
        let mut hard = limit.min(content.len());
        while hard > 0 && !content.is_char_boundary(hard) {
            hard -= 1;
        }
        hard
    };
    format!("{} [truncated]", content[..cut].trim_end())
}

/// Strip filler phrases; append ` [condensed]` when the result is under half
/// the original length.
fn remove_verbose(content: &str) -> String {
    let mut result = content.to_string();
    for pattern in FILLER_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    let result = result.trim().to_string();
    if result.len() * 2 < content.len() {
        format!("{} [condensed]", result)
    } else {
        result
    }
}

/// One-line placeholder: `[<name> - Round <r>: ~<words> words[, contains decision]]`.
fn placeholder(msg: &DeliberationMessage) -> String {
    let words = msg.content.split_whitespace().count();
    let decision_note = if contains_decision_indicator(&msg.content) {
        ", contains decision"
    } else {
        ""
    };
    format!(
        "[{} - Round {}: ~{} words{}]",
        msg.agent_name, msg.round, words, decision_note
    )
}

#[async_trait]
impl ContextManager for ObservationMaskingManager {
    async fn project(
        &self,
        transcript: &[DeliberationMessage],
        recipient_id: &str,
    ) -> Result<ContextWindow, EngineError> {
        if transcript.is_empty() {
            return Ok(ContextWindow::default());
        }

        let current = latest_round(transcript);
        let mut masked_count = 0usize;
        let mut messages = Vec::with_capacity(transcript.len());

        for msg in transcript {
            if self.should_mask(msg, recipient_id, current) {
                let content = self.mask_content(msg).await?;
                let mut rewritten = msg.clone();
                rewritten.token_count = estimate_tokens(&content);
                rewritten.content = content;
                masked_count += 1;
                messages.push(rewritten);
            } else {
                messages.push(msg.clone());
            }
        }

        let estimated_tokens = messages.iter().map(message_tokens).sum();
        Ok(ContextWindow {
            estimated_tokens,
            original_count: transcript.len(),
            retained_count: messages.len(),
            stats: WindowStats {
                dropped: 0,
                summarized: 0,
                masked: masked_count,
                rounds_preserved: rounds_present(&messages),
            },
            summary: None,
            messages,
        })
    }

    fn name(&self) -> &str {
        "ObservationMaskingManager"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::transcript;
    use super::*;

    fn long_message(round: u32, agent: &str, filler: bool) -> DeliberationMessage {
        let mut base = transcript(round, 1).pop().unwrap();
        base.agent_id = agent.to_string();
        base.agent_name = agent.to_string();
        base.content = if filler {
            format!(
                "As I mentioned earlier, the design holds. To elaborate, {} In other words, it works.",
                "the throughput numbers support the claim. ".repeat(30)
            )
        } else {
            "word ".repeat(700).trim_end().to_string()
        };
        base
    }

    #[tokio::test]
    async fn recent_own_and_decision_messages_survive() {
        let manager = ObservationMaskingManager::new(MaskingConfig::default());
        let mut msgs = transcript(5, 2);

        // Old but decision-bearing.
        msgs[0].content = format!("My position is clear. {}", "filler ".repeat(400));
        // Old, verbose, from the recipient itself.
        msgs[1].content = "own ".repeat(900);

        let window = manager.project(&msgs, "a2").await.unwrap();
        assert!(window.messages[0].content.starts_with("My position is"));
        assert!(!window.messages[0].content.contains("[truncated]"));
        assert_eq!(window.messages[1].content, msgs[1].content);
    }

    #[tokio::test]
    async fn verbose_old_messages_get_truncated() {
        let manager = ObservationMaskingManager::new(MaskingConfig::default());
        let mut msgs = transcript(5, 2);
        msgs[0] = long_message(1, "a1", false);
        msgs[0].round = 1;

        let window = manager.project(&msgs, "a2").await.unwrap();
        assert!(window.messages[0].content.ends_with("[truncated]"));
        assert!(window.messages[0].content.len() < msgs[0].content.len());
        assert_eq!(window.stats.masked, 1);
    }

    #[tokio::test]
    async fn remove_verbose_strips_filler() {
        let config = MaskingConfig {
            strategy: MaskingStrategy::RemoveVerbose,
            ..Default::default()
        };
        let manager = ObservationMaskingManager::new(config);
        let mut msgs = transcript(5, 2);
        msgs[0] = long_message(1, "a1", true);
        msgs[0].round = 1;

        let window = manager.project(&msgs, "a2").await.unwrap();
        let masked = &window.messages[0].content;
        assert!(!masked.to_lowercase().contains("as i mentioned"));
        assert!(!masked.to_lowercase().contains("to elaborate"));
        assert!(!masked.to_lowercase().contains("in other words"));
    }

    #[tokio::test]
    async fn placeholder_reports_word_count() {
        let config = MaskingConfig {
            strategy: MaskingStrategy::Placeholder,
            ..Default::default()
        };
        let manager = ObservationMaskingManager::new(config);
        let mut msgs = transcript(5, 2);
        msgs[0].content = "word ".repeat(700).trim_end().to_string();

        let window = manager.project(&msgs, "a2").await.unwrap();
        assert_eq!(window.messages[0].content, "[Agent 1 - Round 1: ~700 words]");
    }

    #[test]
    fn sentence_truncation_keeps_whole_sentences() {
        let content = format!("First sentence here. Second one follows. {}", "x".repeat(400));
        let out = truncate_sentences(&content, 60);
        assert_eq!(out, "First sentence here. Second one follows. [truncated]");
    }

    #[test]
    fn mask_pattern_matching() {
        let config = MaskingConfig {
            mask_patterns: vec![Regex::new(r"(?i)verbose aside").unwrap()],
            verbosity_threshold: 10_000,
            ..Default::default()
        };
        let manager = ObservationMaskingManager::new(config);
        let mut msgs = transcript(5, 2);
        msgs[0].content = "A verbose aside about nothing in particular.".to_string();
        assert!(manager.should_mask(&msgs[0], "a2", 5));
        assert!(!manager.should_mask(&msgs[0], "a1", 5));
    }
}
