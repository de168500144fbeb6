//! Voting and reconciliation strategies.
//!
//! A [`VotingStrategy`] is pure over `(task, responses, context)`: it consumes the
//! responses gathered from a fan-out or a deliberation round and produces exactly
//! one [`VotingResult`] — a winning text plus a consensus score in `[0, 1]`.
//! An empty response list always yields an empty result with consensus `0.0`.
//!
//! Six strategies are provided:
//!
//! | Strategy | Arbiter | Mechanism |
//! |---|---|---|
//! | [`MajorityVoting`](majority::MajorityVoting) | no | bucket identical answers, largest bucket wins |
//! | [`WeightedVoting`](weighted::WeightedVoting) | no | weight × confidence per bucket |
//! | [`RankedChoiceVoting`](ranked_choice::RankedChoiceVoting) | yes | arbiter ranks, instant-runoff elimination |
//! | [`ConsensusVoting`](consensus::ConsensusVoting) | yes | arbiter synthesises a unified answer and scores it |
//! | [`AggregationVoting`](aggregation::AggregationVoting) | optional | combine every answer into one |
//! | [`ExpertPanelVoting`](expert_panel::ExpertPanelVoting) | yes | arbiter scores each answer on five dimensions |
//!
//! Strategies that need an arbiter degrade gracefully when
//! [`VotingContext::arbiter`] is unset — each documents its fallback.

pub mod aggregation;
pub mod consensus;
pub mod expert_panel;
pub mod majority;
pub mod ranked_choice;
pub mod weighted;

pub use aggregation::AggregationVoting;
pub use consensus::ConsensusVoting;
pub use expert_panel::ExpertPanelVoting;
pub use majority::MajorityVoting;
pub use ranked_choice::RankedChoiceVoting;
pub use weighted::WeightedVoting;

use crate::agent::AgentResponse;
use crate::client_wrapper::ClientWrapper;
use crate::error::EngineError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Sentinel agent id for results synthesised by [`ConsensusVoting`](consensus::ConsensusVoting).
pub const CONSENSUS_AGENT_ID: &str = "consensus";
/// Sentinel agent id for results combined by [`AggregationVoting`](aggregation::AggregationVoting).
pub const AGGREGATION_AGENT_ID: &str = "aggregation";

/// Identifies which reconciliation policy produced a [`VotingResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Largest identical-answer bucket wins.
    Majority,
    /// Buckets scored by agent weight × confidence.
    Weighted,
    /// Arbiter-ranked instant-runoff elimination.
    RankedChoice,
    /// Arbiter-synthesised unified answer.
    Consensus,
    /// All answers combined into one comprehensive answer.
    Aggregation,
    /// Arbiter scores each answer on five quality dimensions.
    ExpertPanel,
}

impl StrategyKind {
    /// Stable lowercase tag, also used as the config key.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Majority => "majority",
            StrategyKind::Weighted => "weighted",
            StrategyKind::RankedChoice => "ranked_choice",
            StrategyKind::Consensus => "consensus",
            StrategyKind::Aggregation => "aggregation",
            StrategyKind::ExpertPanel => "expert_panel",
        }
    }

    /// Parse a strategy tag (config surface).
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "majority" => Some(StrategyKind::Majority),
            "weighted" => Some(StrategyKind::Weighted),
            "ranked_choice" | "ranked-choice" => Some(StrategyKind::RankedChoice),
            "consensus" => Some(StrategyKind::Consensus),
            "aggregation" => Some(StrategyKind::Aggregation),
            "expert_panel" | "expert-panel" => Some(StrategyKind::ExpertPanel),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only knobs passed into every voting call.
#[derive(Clone, Default)]
pub struct VotingContext {
    /// Per-agent vote weights; agents not listed weigh `1.0`.
    pub weights: HashMap<String, f64>,
    /// Consensus score a workflow requires before accepting a result.
    pub consensus_threshold: f64,
    /// Whether voters may abstain (reserved for custom strategies).
    pub allow_abstention: bool,
    /// Round cap for strategies that iterate.
    pub max_rounds: usize,
    /// Arbiter capability for strategies that judge or synthesise.
    pub arbiter: Option<Arc<dyn ClientWrapper>>,
}

impl VotingContext {
    /// Context with the default threshold of `0.6` and no arbiter.
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
            consensus_threshold: 0.6,
            allow_abstention: false,
            max_rounds: 3,
            arbiter: None,
        }
    }

    /// Set one agent's vote weight (builder pattern).
    pub fn with_weight(mut self, agent_id: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(agent_id.into(), weight);
        self
    }

    /// Set the required consensus threshold (builder pattern).
    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    /// Attach an arbiter capability (builder pattern).
    pub fn with_arbiter(mut self, arbiter: Arc<dyn ClientWrapper>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// The weight for one agent, defaulting to `1.0`.
    pub fn weight_of(&self, agent_id: &str) -> f64 {
        self.weights.get(agent_id).copied().unwrap_or(1.0)
    }
}

/// The reconciled outcome of one voting call.
#[derive(Debug, Clone)]
pub struct VotingResult {
    /// The winning text.
    pub winning_response: String,
    /// Structured output attached to the winning response, if any.
    pub winning_structured: Option<serde_json::Value>,
    /// Agent id of the winner, or a sentinel ([`CONSENSUS_AGENT_ID`] /
    /// [`AGGREGATION_AGENT_ID`]) for synthesised results.
    pub winning_agent_id: String,
    /// The strategy that produced this result.
    pub strategy: StrategyKind,
    /// Vote tally; keys are stable across invocations of the same strategy.
    pub vote_tally: BTreeMap<String, usize>,
    /// Consensus score in `[0, 1]`.
    pub consensus_score: f64,
}

impl VotingResult {
    /// The empty result returned for an empty response list.
    pub fn empty(strategy: StrategyKind) -> Self {
        Self {
            winning_response: String::new(),
            winning_structured: None,
            winning_agent_id: String::new(),
            strategy,
            vote_tally: BTreeMap::new(),
            consensus_score: 0.0,
        }
    }
}

/// One reconciliation policy over a list of agent responses.
#[async_trait]
pub trait VotingStrategy: Send + Sync {
    /// Reduce `responses` to a single winner plus a consensus score.
    async fn reconcile(
        &self,
        task: &str,
        responses: &[AgentResponse],
        context: &VotingContext,
    ) -> Result<VotingResult, EngineError>;

    /// Which strategy this is; stamped onto every result.
    fn kind(&self) -> StrategyKind;
}

/// Instantiate the strategy behind a [`StrategyKind`] tag.
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn VotingStrategy> {
    match kind {
        StrategyKind::Majority => Arc::new(MajorityVoting),
        StrategyKind::Weighted => Arc::new(WeightedVoting::default()),
        StrategyKind::RankedChoice => Arc::new(RankedChoiceVoting),
        StrategyKind::Consensus => Arc::new(ConsensusVoting),
        StrategyKind::Aggregation => Arc::new(AggregationVoting),
        StrategyKind::ExpertPanel => Arc::new(ExpertPanelVoting),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Normalised bucket key for answer equivalence: lowercased, trimmed, truncated
/// to the first 100 characters, then hashed.  Two responses land in the same
/// bucket iff their normalised prefixes are identical.
pub(crate) fn bucket_key(content: &str) -> String {
    let normalized: String = content.trim().to_lowercase().chars().take(100).collect();
    let digest = Sha256::digest(normalized.as_bytes());
    // 64 bits of the digest is plenty for bucketing and keeps tally keys short.
    digest[..8].iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{:02x}", b);
        acc
    })
}

/// Render responses as a numbered list (1-based) for arbiter prompts.
pub(crate) fn format_numbered(responses: &[AgentResponse]) -> String {
    let mut out = String::new();
    for (i, response) in responses.iter().enumerate() {
        let _ = write!(out, "{}. [{}]: {}\n\n", i + 1, response.agent_name, response.content);
    }
    out
}

/// All decimal numbers appearing in free-form text, in order.
pub(crate) fn all_numbers(content: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let mut current = String::new();
    for ch in content.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() || (ch == '.' && !current.is_empty() && !current.contains('.')) {
            current.push(ch);
        } else {
            if !current.is_empty() {
                if let Ok(n) = current.trim_end_matches('.').parse::<f64>() {
                    numbers.push(n);
                }
            }
            current.clear();
        }
    }
    numbers
}

/// Group responses into insertion-ordered buckets of equivalent answers.
///
/// Returns `(key, member indices)` pairs; the first member of each bucket is the
/// first response encountered with that answer.
pub(crate) fn bucket_responses(responses: &[AgentResponse]) -> Vec<(String, Vec<usize>)> {
    let mut buckets: Vec<(String, Vec<usize>)> = Vec::new();
    for (i, response) in responses.iter().enumerate() {
        let key = bucket_key(&response.content);
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(i),
            None => buckets.push((key, vec![i])),
        }
    }
    buckets
}

#[cfg(test)]
pub(crate) fn test_response(agent_id: &str, content: &str) -> AgentResponse {
    AgentResponse {
        agent_id: agent_id.to_string(),
        agent_name: agent_id.to_string(),
        content: content.to_string(),
        structured: None,
        confidence: None,
        elapsed: std::time::Duration::ZERO,
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_key_normalises() {
        assert_eq!(bucket_key("  Yes  "), bucket_key("yes"));
        assert_ne!(bucket_key("yes"), bucket_key("no"));
        // Only the first 100 characters participate.
        let long_a = format!("{}{}", "x".repeat(100), "tail one");
        let long_b = format!("{}{}", "x".repeat(100), "different tail");
        assert_eq!(bucket_key(&long_a), bucket_key(&long_b));
    }

    #[test]
    fn buckets_preserve_insertion_order() {
        let responses = vec![
            test_response("a1", "yes"),
            test_response("a2", "no"),
            test_response("a3", "YES"),
        ];
        let buckets = bucket_responses(&responses);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].1, vec![0, 2]);
        assert_eq!(buckets[1].1, vec![1]);
    }

    #[test]
    fn all_numbers_scans_in_order() {
        assert_eq!(all_numbers("0.9, then 0.3 and 2"), vec![0.9, 0.3, 2.0]);
        assert!(all_numbers("none").is_empty());
    }

    #[test]
    fn strategy_tags_round_trip() {
        for kind in [
            StrategyKind::Majority,
            StrategyKind::Weighted,
            StrategyKind::RankedChoice,
            StrategyKind::Consensus,
            StrategyKind::Aggregation,
            StrategyKind::ExpertPanel,
        ] {
            assert_eq!(StrategyKind::from_key(kind.as_str()), Some(kind));
        }
        assert_eq!(StrategyKind::from_key("plurality"), None);
    }
}
