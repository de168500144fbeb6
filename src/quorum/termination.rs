//! Composable termination strategies for deliberations.
//!
//! Atomic strategies are predicates over [`DeliberationState`]; the
//! [`CompositeTermination`] container combines them under two modes:
//!
//! - [`CompositeMode::Any`] (default): children are checked in insertion order
//!   and the first terminating decision short-circuits.  Register cheap bounds
//!   ([`MaxRounds`], [`MaxTokens`], [`MaxTime`]) before LLM-backed judges so a
//!   deliberation that is already over budget is not asked another LLM whether
//!   to stop.
//! - [`CompositeMode::All`]: every child runs; the deliberation terminates only
//!   when all of them fire, with a synthesized explanation listing each.
//!
//! # Example
//!
//! ```rust
//! use quorum::termination::{CompositeTermination, MaxRounds, MaxTokens};
//! use std::time::Duration;
//!
//! let budget = CompositeTermination::any()
//!     .with(MaxRounds::new(8))
//!     .with(MaxTokens::new(200_000))
//!     .with(quorum::termination::MaxTime::new(Duration::from_secs(300)));
//! ```

use crate::agent::{Agent, SchemaHint};
use crate::deliberation::DeliberationState;
use crate::error::EngineError;
use crate::workflow::Workflow;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a deliberation stopped (or why a particular check fired).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The round bound was reached.
    MaxRoundsReached,
    /// The token budget was exhausted.
    MaxTokensReached,
    /// The wall-clock budget was exhausted.
    MaxTimeReached,
    /// The convergence score crossed its threshold.
    ConvergenceAchieved,
    /// An LLM judge agent decided the deliberation is done.
    AgentDecision,
    /// A judge workflow decided the deliberation is done.
    WorkflowDecision,
    /// A caller-supplied predicate fired.
    CustomCondition,
    /// Every child of an `All`-mode composite fired.
    AllStrategies,
    /// The caller cancelled the deliberation.
    ManualStop,
    /// No strategy fired; the deliberation continues.
    NotTerminated,
}

/// The outcome of one termination check.
#[derive(Debug, Clone)]
pub struct TerminationDecision {
    /// Whether the deliberation should stop now.
    pub should_terminate: bool,
    /// Which strategy (or outcome) produced this decision.
    pub reason: TerminationReason,
    /// Human-readable explanation.
    pub explanation: String,
    /// Decision confidence in `[0, 1]`.  Deterministic strategies report `1.0`.
    pub confidence: f64,
}

impl TerminationDecision {
    /// A terminating decision from a deterministic strategy.
    pub fn terminate(reason: TerminationReason, explanation: impl Into<String>) -> Self {
        Self {
            should_terminate: true,
            reason,
            explanation: explanation.into(),
            confidence: 1.0,
        }
    }

    /// A non-terminating decision tagged with the checking strategy's reason.
    pub fn proceed(reason: TerminationReason, explanation: impl Into<String>) -> Self {
        Self {
            should_terminate: false,
            reason,
            explanation: explanation.into(),
            confidence: 1.0,
        }
    }
}

/// Predicate over deliberation state deciding whether to stop.
#[async_trait]
pub trait TerminationStrategy: Send + Sync {
    /// Evaluate the strategy against the current state.
    async fn check(
        &self,
        state: &DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError>;

    /// Human-readable name for logging and composite explanations.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Deterministic bounds
// ---------------------------------------------------------------------------

/// Terminate once `current_round >= n`.
///
/// Checked before the round counter is incremented, so `MaxRounds::new(5)`
/// stops after five completed rounds.
#[derive(Debug, Clone, Copy)]
pub struct MaxRounds {
    limit: u32,
}

impl MaxRounds {
    /// Bound the deliberation to `limit` completed rounds.
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl TerminationStrategy for MaxRounds {
    async fn check(
        &self,
        state: &DeliberationState,
        _cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        if state.current_round >= self.limit {
            Ok(TerminationDecision::terminate(
                TerminationReason::MaxRoundsReached,
                format!("round limit of {} reached", self.limit),
            ))
        } else {
            Ok(TerminationDecision::proceed(
                TerminationReason::MaxRoundsReached,
                format!("round {}/{}", state.current_round, self.limit),
            ))
        }
    }

    fn name(&self) -> &str {
        "MaxRounds"
    }
}

/// Terminate once `total_tokens_used >= n`.
#[derive(Debug, Clone, Copy)]
pub struct MaxTokens {
    limit: usize,
}

impl MaxTokens {
    /// Bound the deliberation to `limit` total tokens.
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl TerminationStrategy for MaxTokens {
    async fn check(
        &self,
        state: &DeliberationState,
        _cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        if state.total_tokens_used >= self.limit {
            Ok(TerminationDecision::terminate(
                TerminationReason::MaxTokensReached,
                format!(
                    "token budget of {} exhausted ({} used)",
                    self.limit, state.total_tokens_used
                ),
            ))
        } else {
            Ok(TerminationDecision::proceed(
                TerminationReason::MaxTokensReached,
                format!("{}/{} tokens used", state.total_tokens_used, self.limit),
            ))
        }
    }

    fn name(&self) -> &str {
        "MaxTokens"
    }
}

/// Terminate once the deliberation has run for at least the given duration.
///
/// A round in progress is allowed to complete; the predicate fires at the next
/// scheduled check.
#[derive(Debug, Clone, Copy)]
pub struct MaxTime {
    limit: Duration,
}

impl MaxTime {
    /// Bound the deliberation to `limit` of wall-clock time.
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl TerminationStrategy for MaxTime {
    async fn check(
        &self,
        state: &DeliberationState,
        _cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        let elapsed = state.elapsed();
        if elapsed >= self.limit {
            Ok(TerminationDecision::terminate(
                TerminationReason::MaxTimeReached,
                format!("time budget of {:?} exhausted ({:?} elapsed)", self.limit, elapsed),
            ))
        } else {
            Ok(TerminationDecision::proceed(
                TerminationReason::MaxTimeReached,
                format!("{:?}/{:?} elapsed", elapsed, self.limit),
            ))
        }
    }

    fn name(&self) -> &str {
        "MaxTime"
    }
}

/// Terminate once the convergence score crosses a threshold, but never before
/// `min_rounds` completed rounds.
///
/// Convergence is computed after each round (S4), while this check runs before
/// the next round starts (S1) — with the default `min_rounds` of 2 the
/// earliest possible stop is therefore at the check preceding round 3.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceTermination {
    threshold: f64,
    min_rounds: u32,
}

impl ConvergenceTermination {
    /// Terminate at `threshold` with the default minimum of 2 completed rounds.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            min_rounds: 2,
        }
    }

    /// Override the minimum number of completed rounds.
    pub fn with_min_rounds(mut self, min_rounds: u32) -> Self {
        self.min_rounds = min_rounds;
        self
    }
}

#[async_trait]
impl TerminationStrategy for ConvergenceTermination {
    async fn check(
        &self,
        state: &DeliberationState,
        _cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        let score = state.convergence_score;
        if state.current_round >= self.min_rounds {
            if let Some(score) = score {
                if score >= self.threshold {
                    return Ok(TerminationDecision::terminate(
                        TerminationReason::ConvergenceAchieved,
                        format!("convergence {:.3} >= threshold {:.3}", score, self.threshold),
                    ));
                }
            }
        }
        Ok(TerminationDecision::proceed(
            TerminationReason::ConvergenceAchieved,
            match score {
                Some(score) => format!("convergence {:.3} below {:.3}", score, self.threshold),
                None => "no convergence score yet".to_string(),
            },
        ))
    }

    fn name(&self) -> &str {
        "ConvergenceTermination"
    }
}

// ---------------------------------------------------------------------------
// Custom predicate
// ---------------------------------------------------------------------------

type SyncPredicate = Box<dyn Fn(&DeliberationState) -> bool + Send + Sync>;
type AsyncPredicate =
    Box<dyn for<'a> Fn(&'a DeliberationState) -> BoxFuture<'a, bool> + Send + Sync>;

enum Predicate {
    Sync(SyncPredicate),
    Async(AsyncPredicate),
}

/// Caller-supplied predicate, synchronous or asynchronous.
///
/// # Example
///
/// ```rust
/// use quorum::termination::CustomTermination;
///
/// let quiet = CustomTermination::new("transcript went quiet", |state| {
///     state
///         .transcript
///         .last()
///         .map(|m| m.content.len() < 10)
///         .unwrap_or(false)
/// });
/// ```
pub struct CustomTermination {
    description: String,
    predicate: Predicate,
}

impl CustomTermination {
    /// Build from a synchronous predicate.
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&DeliberationState) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Predicate::Sync(Box::new(predicate)),
        }
    }

    /// Build from an asynchronous predicate.
    pub fn new_async<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: for<'a> Fn(&'a DeliberationState) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Predicate::Async(Box::new(predicate)),
        }
    }
}

#[async_trait]
impl TerminationStrategy for CustomTermination {
    async fn check(
        &self,
        state: &DeliberationState,
        _cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        let fired = match &self.predicate {
            Predicate::Sync(f) => f(state),
            Predicate::Async(f) => f(state).await,
        };
        if fired {
            Ok(TerminationDecision::terminate(
                TerminationReason::CustomCondition,
                self.description.clone(),
            ))
        } else {
            Ok(TerminationDecision::proceed(
                TerminationReason::CustomCondition,
                format!("condition not met: {}", self.description),
            ))
        }
    }

    fn name(&self) -> &str {
        "CustomTermination"
    }
}

// ---------------------------------------------------------------------------
// LLM-backed judges
// ---------------------------------------------------------------------------

/// Structured verdict emitted by judge agents and judge workflows.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminationJudgement {
    /// The judge's verdict.
    pub should_terminate: bool,
    /// The judge's confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-form justification.
    #[serde(default)]
    pub reasoning: String,
    /// Discussion points the judge considers settled.
    #[serde(default)]
    pub key_points_resolved: Vec<String>,
    /// Discussion points the judge considers still open.
    #[serde(default)]
    pub outstanding_issues: Vec<String>,
}

fn judgement_schema() -> SchemaHint {
    SchemaHint::new()
        .field("should_terminate", "boolean")
        .field("confidence", "number")
        .field("reasoning", "string")
        .field("key_points_resolved", "array of string")
        .field("outstanding_issues", "array of string")
}

/// Summarise the last two rounds of the transcript for a judge prompt.
fn recent_transcript(state: &DeliberationState) -> String {
    let mut out = String::new();
    let from_round = state.current_round.saturating_sub(1).max(1);
    for round in from_round..=state.current_round {
        let _ = write!(out, "\n--- Round {} ---\n", round);
        for msg in state.messages_in_round(round) {
            let _ = writeln!(out, "[{}]: {}", msg.agent_name, msg.content);
        }
    }
    out
}

/// An LLM judge agent deciding whether the deliberation has run its course.
///
/// The judge is invoked with structured output; the deliberation terminates
/// only when the verdict parses, `should_terminate` is true, and the judge's
/// confidence meets the threshold (default 0.7).
pub struct AgentTerminator {
    judge: Arc<Agent>,
    prompt: Option<String>,
    confidence_threshold: f64,
}

impl AgentTerminator {
    /// Create a terminator around a judge agent with the default 0.7 threshold.
    pub fn new(judge: Arc<Agent>) -> Self {
        Self {
            judge,
            prompt: None,
            confidence_threshold: 0.7,
        }
    }

    /// Override the framing prompt shown to the judge.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Override the confidence threshold.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_task(&self, state: &DeliberationState) -> String {
        let framing = self.prompt.clone().unwrap_or_else(|| {
            "You are judging whether a multi-agent deliberation has reached a useful \
             conclusion and should stop."
                .to_string()
        });
        format!(
            "{}\n\nOriginal task:\n{}\n\nRecent discussion:{}\n\nShould the deliberation terminate now?",
            framing,
            state.task,
            recent_transcript(state)
        )
    }
}

#[async_trait]
impl TerminationStrategy for AgentTerminator {
    async fn check(
        &self,
        state: &DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        let response = self
            .judge
            .process_structured(&self.build_task(state), &judgement_schema(), &[], cancel)
            .await;

        match response.parse_structured::<TerminationJudgement>() {
            Some(judgement)
                if judgement.should_terminate
                    && judgement.confidence >= self.confidence_threshold =>
            {
                Ok(TerminationDecision {
                    should_terminate: true,
                    reason: TerminationReason::AgentDecision,
                    explanation: judgement.reasoning,
                    confidence: judgement.confidence.clamp(0.0, 1.0),
                })
            }
            Some(judgement) => Ok(TerminationDecision {
                should_terminate: false,
                reason: TerminationReason::AgentDecision,
                explanation: judgement.reasoning,
                confidence: judgement.confidence.clamp(0.0, 1.0),
            }),
            None => Ok(TerminationDecision {
                should_terminate: false,
                reason: TerminationReason::AgentDecision,
                explanation: "judge verdict did not parse".to_string(),
                confidence: 0.0,
            }),
        }
    }

    fn name(&self) -> &str {
        "AgentTerminator"
    }
}

/// A judge backed by an entire single-shot [`Workflow`] rather than one agent.
///
/// Useful when the stop/continue call itself deserves multiple perspectives and
/// a reconciliation pass.
pub struct WorkflowTerminator {
    workflow: Arc<Workflow>,
    confidence_threshold: f64,
}

impl WorkflowTerminator {
    /// Create a terminator around a judge workflow with the default 0.7 threshold.
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            workflow,
            confidence_threshold: 0.7,
        }
    }

    /// Override the confidence threshold.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

#[async_trait]
impl TerminationStrategy for WorkflowTerminator {
    async fn check(
        &self,
        state: &DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        let task = format!(
            "You are judging whether a multi-agent deliberation has reached a useful \
             conclusion and should stop.\n\nOriginal task:\n{}\n\nRecent discussion:{}\n\n\
             Should the deliberation terminate now?",
            state.task,
            recent_transcript(state)
        );

        let result = self
            .workflow
            .execute_structured::<TerminationJudgement>(&task, &judgement_schema(), cancel)
            .await;

        match result.value {
            Some(judgement)
                if judgement.should_terminate
                    && judgement.confidence >= self.confidence_threshold =>
            {
                Ok(TerminationDecision {
                    should_terminate: true,
                    reason: TerminationReason::WorkflowDecision,
                    explanation: judgement.reasoning,
                    confidence: judgement.confidence.clamp(0.0, 1.0),
                })
            }
            Some(judgement) => Ok(TerminationDecision {
                should_terminate: false,
                reason: TerminationReason::WorkflowDecision,
                explanation: judgement.reasoning,
                confidence: judgement.confidence.clamp(0.0, 1.0),
            }),
            None => Ok(TerminationDecision {
                should_terminate: false,
                reason: TerminationReason::WorkflowDecision,
                explanation: result
                    .error
                    .unwrap_or_else(|| "judge workflow produced no verdict".to_string()),
                confidence: 0.0,
            }),
        }
    }

    fn name(&self) -> &str {
        "WorkflowTerminator"
    }
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// How a [`CompositeTermination`] combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    /// First terminating child wins; later children are not evaluated.
    #[default]
    Any,
    /// Terminate only when every child fires.
    All,
}

/// A typed container of child strategies plus a combination mode.
#[derive(Default)]
pub struct CompositeTermination {
    children: Vec<Arc<dyn TerminationStrategy>>,
    mode: CompositeMode,
}

impl CompositeTermination {
    /// An empty `Any`-mode composite.  An empty composite never terminates.
    pub fn any() -> Self {
        Self {
            children: Vec::new(),
            mode: CompositeMode::Any,
        }
    }

    /// An empty `All`-mode composite.
    pub fn all() -> Self {
        Self {
            children: Vec::new(),
            mode: CompositeMode::All,
        }
    }

    /// Append a child strategy (builder pattern).  Order matters in `Any`
    /// mode: earlier children are checked first.
    pub fn with(mut self, strategy: impl TerminationStrategy + 'static) -> Self {
        self.children.push(Arc::new(strategy));
        self
    }

    /// Append an already-shared child strategy.
    pub fn with_shared(mut self, strategy: Arc<dyn TerminationStrategy>) -> Self {
        self.children.push(strategy);
        self
    }

    /// Number of registered children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the composite has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl TerminationStrategy for CompositeTermination {
    async fn check(
        &self,
        state: &DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        match self.mode {
            CompositeMode::Any => {
                for child in &self.children {
                    let decision = child.check(state, cancel).await?;
                    if decision.should_terminate {
                        log::debug!("termination: '{}' fired — {}", child.name(), decision.explanation);
                        return Ok(decision);
                    }
                }
                Ok(TerminationDecision::proceed(
                    TerminationReason::NotTerminated,
                    "no strategy fired",
                ))
            }
            CompositeMode::All => {
                let mut explanations = Vec::with_capacity(self.children.len());
                let mut min_confidence = 1.0f64;
                for child in &self.children {
                    let decision = child.check(state, cancel).await?;
                    if !decision.should_terminate {
                        return Ok(TerminationDecision::proceed(
                            TerminationReason::NotTerminated,
                            format!("'{}' has not fired: {}", child.name(), decision.explanation),
                        ));
                    }
                    min_confidence = min_confidence.min(decision.confidence);
                    explanations.push(format!("{}: {}", child.name(), decision.explanation));
                }
                if explanations.is_empty() {
                    return Ok(TerminationDecision::proceed(
                        TerminationReason::NotTerminated,
                        "composite has no children",
                    ));
                }
                Ok(TerminationDecision {
                    should_terminate: true,
                    reason: TerminationReason::AllStrategies,
                    explanation: explanations.join("; "),
                    confidence: min_confidence,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "CompositeTermination"
    }
}
