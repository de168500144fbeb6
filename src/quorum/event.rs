//! Progress event contracts for workflows and deliberations.
//!
//! Implement [`ProgressHandler`] to receive real-time notifications from the
//! executors.  Both methods have default no-op implementations, so you only
//! override what you care about.  The handler is wrapped in
//! `Arc<dyn ProgressHandler>` and shared with the executor at build time.
//!
//! # Example
//!
//! ```rust
//! use quorum::event::{DeliberationProgress, ProgressHandler, WorkflowProgress};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl ProgressHandler for Printer {
//!     async fn on_workflow_progress(&self, progress: &WorkflowProgress) {
//!         println!(
//!             "[{:?}] {}/{} — {}",
//!             progress.stage, progress.completed_agents, progress.total_agents, progress.message
//!         );
//!     }
//!     async fn on_deliberation_progress(&self, progress: &DeliberationProgress) {
//!         println!("[{:?}] round {} — {}", progress.stage, progress.current_round, progress.message);
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;

/// Phases of a single-shot workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStage {
    /// The executor is validating configuration and preparing the fan-out.
    Initializing,
    /// An agent invocation started or completed.
    AgentProcessing,
    /// The configured voting strategy is reconciling the responses.
    Voting,
    /// The consensus threshold was missed; the consensus strategy is re-running.
    ConsensusBuilding,
    /// The winning output is being extracted.
    Finalizing,
    /// The workflow finished successfully.
    Completed,
    /// The workflow failed.
    Failed,
}

/// One workflow progress notification.
#[derive(Debug, Clone)]
pub struct WorkflowProgress {
    /// Current stage.
    pub stage: WorkflowStage,
    /// Human-readable status line.
    pub message: String,
    /// Monotonic count of agents that have completed so far.
    pub completed_agents: usize,
    /// Total number of agents in the fan-out.
    pub total_agents: usize,
    /// Agent the notification refers to, when stage is
    /// [`AgentProcessing`](WorkflowStage::AgentProcessing).
    pub current_agent_id: Option<String>,
}

/// Phases of a multi-round deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliberationStage {
    /// The executor is preparing state.
    Initializing,
    /// A new round is starting.
    RoundStarting,
    /// An agent is producing its turn.
    AgentSpeaking,
    /// All agents of the round have spoken.
    RoundComplete,
    /// The convergence calculator is running.
    EvaluatingConvergence,
    /// The termination composite is being checked.
    CheckingTermination,
    /// The voting strategy is synthesising the final result.
    Synthesizing,
    /// The deliberation finished successfully.
    Complete,
    /// The deliberation failed.
    Failed,
}

/// One deliberation progress notification.
#[derive(Debug, Clone)]
pub struct DeliberationProgress {
    /// Current stage.
    pub stage: DeliberationStage,
    /// Round the notification refers to (0 during initialization).
    pub current_round: u32,
    /// Round bound when a `MaxRounds` budget is known.
    pub max_rounds: Option<u32>,
    /// Agent currently speaking, if any.
    pub current_speaker: Option<String>,
    /// Tokens consumed so far.
    pub tokens_used: usize,
    /// Token bound when a `MaxTokens` budget is known.
    pub token_budget: Option<usize>,
    /// Wall-clock time since the deliberation started.
    pub elapsed: Duration,
    /// Time bound when a `MaxTime` budget is known.
    pub time_budget: Option<Duration>,
    /// Most recent convergence score, if one has been computed.
    pub convergence_score: Option<f64>,
    /// Convergence threshold when one is configured.
    pub convergence_threshold: Option<f64>,
    /// Human-readable status line.
    pub message: String,
}

/// Callback surface for executor progress.
#[async_trait]
pub trait ProgressHandler: Send + Sync {
    /// Receive workflow progress.  Default: no-op.
    async fn on_workflow_progress(&self, _progress: &WorkflowProgress) {}

    /// Receive deliberation progress.  Default: no-op.
    async fn on_deliberation_progress(&self, _progress: &DeliberationProgress) {}
}
