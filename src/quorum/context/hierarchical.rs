//! Hierarchical projection: named phases with per-phase and global summaries.

use super::{
    estimate_tokens, latest_round, message_tokens, rounds_present, ContextManager, ContextWindow,
    WindowStats,
};
use crate::client_wrapper::{ClientWrapper, CompletionOptions, Message};
use crate::deliberation::DeliberationMessage;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How prior phases are titled in the projected summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseNaming {
    /// `Phase 1`, `Phase 2`, …
    #[default]
    Numbered,
    /// `Initial Positions`, `Early Deliberation`, … (falls back to `Phase N`).
    Descriptive,
    /// `Rounds 1–3`, `Rounds 4–6`, …
    RoundRange,
}

const DESCRIPTIVE_NAMES: [&str; 4] = [
    "Initial Positions",
    "Early Deliberation",
    "Developing Arguments",
    "Refinement",
];

/// One segment of `rounds_per_phase` consecutive rounds.
#[derive(Debug, Clone)]
struct Phase {
    index: usize,
    first_round: u32,
    last_round: u32,
}

impl Phase {
    fn title(&self, naming: PhaseNaming, is_current: bool) -> String {
        if is_current {
            return format!(
                "Current Discussion (Round {}–{})",
                self.first_round, self.last_round
            );
        }
        match naming {
            PhaseNaming::Numbered => format!("Phase {}", self.index + 1),
            PhaseNaming::Descriptive => DESCRIPTIVE_NAMES
                .get(self.index)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("Phase {}", self.index + 1)),
            PhaseNaming::RoundRange => format!("Rounds {}–{}", self.first_round, self.last_round),
        }
    }
}

/// Segment the deliberation into phases, summarise prior phases with an LLM,
/// and pack the result under a token budget.
///
/// Packing order: the most recent phase goes in verbatim when it fits within
/// `recent_phase_allocation × budget` (default 0.5); the global overview takes
/// at most 30 % of what remains; older phase summaries share the rest equally,
/// truncated to their share when necessary.
pub struct HierarchicalManager {
    llm: Arc<dyn ClientWrapper>,
    rounds_per_phase: u32,
    max_tokens: Option<usize>,
    recent_phase_allocation: f64,
    naming: PhaseNaming,
    /// Phase summaries keyed by `(first_round, last_round)`.
    summary_cache: Mutex<HashMap<(u32, u32), String>>,
}

impl HierarchicalManager {
    /// Manager with 3-round phases, numbered naming, and no budget.
    pub fn new(llm: Arc<dyn ClientWrapper>) -> Self {
        Self {
            llm,
            rounds_per_phase: 3,
            max_tokens: None,
            recent_phase_allocation: 0.5,
            naming: PhaseNaming::Numbered,
            summary_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Rounds per phase (builder pattern).
    pub fn with_rounds_per_phase(mut self, rounds: u32) -> Self {
        self.rounds_per_phase = rounds.max(1);
        self
    }

    /// Cap the projection's estimated tokens (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Fraction of the budget reserved for the current phase (builder pattern).
    pub fn with_recent_phase_allocation(mut self, allocation: f64) -> Self {
        self.recent_phase_allocation = allocation.clamp(0.0, 1.0);
        self
    }

    /// Phase naming style (builder pattern).
    pub fn with_naming(mut self, naming: PhaseNaming) -> Self {
        self.naming = naming;
        self
    }

    fn segment(&self, current_round: u32) -> Vec<Phase> {
        let mut phases = Vec::new();
        let mut first = 1u32;
        let mut index = 0usize;
        while first <= current_round {
            let last = (first + self.rounds_per_phase - 1).min(current_round);
            phases.push(Phase {
                index,
                first_round: first,
                last_round: last,
            });
            first = last + 1;
            index += 1;
        }
        phases
    }

    async fn summarize_phase(
        &self,
        transcript: &[DeliberationMessage],
        phase: &Phase,
    ) -> Result<String, EngineError> {
        let key = (phase.first_round, phase.last_round);
        if let Some(cached) = self.summary_cache.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        let mut text = String::new();
        for msg in transcript
            .iter()
            .filter(|m| m.round >= phase.first_round && m.round <= phase.last_round)
        {
            let _ = writeln!(text, "[{} / round {}]: {}", msg.agent_name, msg.round, msg.content);
        }
        let prompt = format!(
            "Summarize rounds {}–{} of a multi-agent deliberation in a short paragraph. \
             Preserve each participant's position and any decisions.\n\n{}",
            phase.first_round, phase.last_round, text
        );
        let opts = CompletionOptions {
            temperature: Some(0.3),
            ..Default::default()
        };
        let summary = self
            .llm
            .complete(&[Message::user(prompt)], Some(&opts))
            .await?
            .content;

        self.summary_cache.lock().await.insert(key, summary.clone());
        Ok(summary)
    }

    async fn global_overview(&self, phase_summaries: &[(String, String)]) -> Result<String, EngineError> {
        let mut text = String::new();
        for (title, summary) in phase_summaries {
            let _ = writeln!(text, "{}:\n{}\n", title, summary);
        }
        let prompt = format!(
            "Condense these phase summaries of a long deliberation into a single \
             brief overview of how the discussion has evolved:\n\n{}",
            text
        );
        let opts = CompletionOptions {
            temperature: Some(0.3),
            ..Default::default()
        };
        Ok(self
            .llm
            .complete(&[Message::user(prompt)], Some(&opts))
            .await?
            .content)
    }
}

/// Truncate a summary to roughly `budget` tokens (4 chars per token).
fn truncate_to_tokens(text: &str, budget: usize) -> String {
    let max_chars = budget.saturating_mul(4);
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut cut = max_chars.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

#[async_trait]
impl ContextManager for HierarchicalManager {
    async fn project(
        &self,
        transcript: &[DeliberationMessage],
        _recipient_id: &str,
    ) -> Result<ContextWindow, EngineError> {
        if transcript.is_empty() {
            return Ok(ContextWindow::default());
        }

        let current = latest_round(transcript);
        let phases = self.segment(current);
        let (current_phase, prior_phases) = phases.split_last().expect("at least one phase");

        // Current phase verbatim (possibly trimmed to its allocation below).
        let mut recent_messages: Vec<DeliberationMessage> = transcript
            .iter()
            .filter(|m| m.round >= current_phase.first_round)
            .cloned()
            .collect();

        // Prior phase summaries plus, when there is more than one, an overview.
        let mut phase_summaries: Vec<(String, String)> = Vec::new();
        for phase in prior_phases {
            let summary = self.summarize_phase(transcript, phase).await?;
            phase_summaries.push((phase.title(self.naming, false), summary));
        }
        let overview = if phase_summaries.len() > 1 {
            Some(self.global_overview(&phase_summaries).await?)
        } else {
            None
        };

        let mut stats = WindowStats::default();
        stats.summarized = transcript.len() - recent_messages.len();

        // Budget packing.
        let mut summary_sections: Vec<(String, String)> = Vec::new();
        if let Some(budget) = self.max_tokens {
            let recent_budget =
                (budget as f64 * self.recent_phase_allocation).floor() as usize;
            let mut recent_tokens: usize =
                recent_messages.iter().map(message_tokens).sum();
            if recent_tokens > recent_budget {
                // Keep the newest messages that fit the allocation.
                let mut kept: Vec<DeliberationMessage> = Vec::new();
                let mut used = 0usize;
                for msg in recent_messages.iter().rev() {
                    let t = message_tokens(msg);
                    if used + t > recent_budget {
                        break;
                    }
                    used += t;
                    kept.push(msg.clone());
                }
                kept.reverse();
                stats.dropped += recent_messages.len() - kept.len();
                recent_messages = kept;
                recent_tokens = used;
            }

            let mut remaining = budget.saturating_sub(recent_tokens);
            if let Some(overview) = overview {
                let overview_budget = (remaining as f64 * 0.3).floor() as usize;
                let tokens = estimate_tokens(&overview);
                if tokens <= overview_budget {
                    remaining -= tokens;
                    summary_sections.push(("Overview".to_string(), overview));
                }
            }
            if !phase_summaries.is_empty() {
                let share = remaining / phase_summaries.len();
                for (title, summary) in phase_summaries {
                    let tokens = estimate_tokens(&summary);
                    if tokens <= share {
                        summary_sections.push((title, summary));
                    } else if share > 0 {
                        summary_sections.push((title, truncate_to_tokens(&summary, share)));
                    }
                }
            }
        } else {
            if let Some(overview) = overview {
                summary_sections.push(("Overview".to_string(), overview));
            }
            summary_sections.extend(phase_summaries);
        }

        let summary = if summary_sections.is_empty() {
            None
        } else {
            let mut out = String::new();
            for (i, (title, body)) in summary_sections.iter().enumerate() {
                if i > 0 {
                    out.push_str("\n\n");
                }
                let _ = write!(out, "{}: {}", title, body);
            }
            Some(out)
        };

        let summary_tokens = summary.as_deref().map(estimate_tokens).unwrap_or(0);
        let estimated_tokens =
            summary_tokens + recent_messages.iter().map(message_tokens).sum::<usize>();
        stats.rounds_preserved = rounds_present(&recent_messages);
        let retained = recent_messages.len();

        Ok(ContextWindow {
            estimated_tokens,
            original_count: transcript.len(),
            retained_count: retained,
            stats,
            summary,
            messages: recent_messages,
        })
    }

    fn name(&self) -> &str {
        "HierarchicalManager"
    }
}
