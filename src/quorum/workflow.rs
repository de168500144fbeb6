//! Single-shot workflow executor: fan one task out to every agent, reconcile
//! the answers with a voting strategy.
//!
//! ```text
//! task ──► agents (parallel or sequential) ──► voting ──► [consensus retry] ──► typed output
//! ```
//!
//! The executor never aborts a run because one agent failed — agents swallow
//! provider errors into `Error: …` responses (see [`crate::agent`]) — but a run
//! with *zero* gathered responses is a failure.  Parallel fan-outs honour an
//! optional deadline that is linked with the caller's cancellation token; a
//! deadline trip that is not a user cancellation surfaces as a distinct
//! timeout failure.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::agent::Agent;
//! use quorum::clients::openai::OpenAIClient;
//! use quorum::voting::MajorityVoting;
//! use quorum::workflow::Workflow;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async {
//! let client = Arc::new(OpenAIClient::new("key", "gpt-4o"));
//! let agents = vec![
//!     Arc::new(Agent::new("a1", "Optimist", client.clone())),
//!     Arc::new(Agent::new("a2", "Pessimist", client.clone())),
//!     Arc::new(Agent::new("a3", "Realist", client)),
//! ];
//!
//! let workflow = Workflow::new(agents, Arc::new(MajorityVoting)).unwrap();
//! let result = workflow.execute("Should we ship on Friday?", &CancellationToken::new()).await;
//! if result.success {
//!     println!("{}", result.value.unwrap());
//! }
//! # };
//! ```

use crate::agent::{Agent, AgentResponse, SchemaHint};
use crate::error::EngineError;
use crate::event::{ProgressHandler, WorkflowProgress, WorkflowStage};
use crate::voting::{ConsensusVoting, VotingContext, VotingResult, VotingStrategy};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Execution knobs for one [`Workflow`].
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Invoke agents concurrently (default) or in registration order.
    pub enable_parallel_execution: bool,
    /// Deadline applied to a parallel fan-out.
    pub timeout: Option<Duration>,
    /// Re-run with the consensus strategy when the first vote scores below
    /// [`minimum_consensus_score`](WorkflowOptions::minimum_consensus_score).
    pub require_consensus: bool,
    /// Threshold for the consensus retry.
    pub minimum_consensus_score: f64,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            enable_parallel_execution: true,
            timeout: None,
            require_consensus: false,
            minimum_consensus_score: 0.6,
        }
    }
}

/// Outcome of one workflow execution.
///
/// `success` is the source of truth: a failed run carries `error` and whatever
/// partial `agent_responses` were gathered before the failure.
#[derive(Debug)]
pub struct WorkflowResult<T> {
    /// Whether the run completed.
    pub success: bool,
    /// The extracted winning output (winning text for `T = String`, the
    /// deserialized structured output otherwise).
    pub value: Option<T>,
    /// Every gathered agent response, in completion order for parallel runs
    /// and registration order for sequential runs.
    pub agent_responses: Vec<AgentResponse>,
    /// The reconciliation outcome, when voting ran.
    pub voting_result: Option<VotingResult>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

impl<T> WorkflowResult<T> {
    fn failure(error: impl Into<String>, responses: Vec<AgentResponse>, elapsed: Duration) -> Self {
        Self {
            success: false,
            value: None,
            agent_responses: responses,
            voting_result: None,
            elapsed,
            error: Some(error.into()),
        }
    }
}

/// The single-shot fan-out executor.
pub struct Workflow {
    agents: Vec<Arc<Agent>>,
    voting: Arc<dyn VotingStrategy>,
    voting_context: VotingContext,
    options: WorkflowOptions,
    progress: Option<Arc<dyn ProgressHandler>>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("agents", &self.agents.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Build a workflow over the given agents and voting strategy.
    ///
    /// Fails synchronously with a configuration error when `agents` is empty.
    pub fn new(
        agents: Vec<Arc<Agent>>,
        voting: Arc<dyn VotingStrategy>,
    ) -> Result<Self, EngineError> {
        if agents.is_empty() {
            return Err(EngineError::Configuration(
                "cannot build a workflow with no agents".to_string(),
            ));
        }
        Ok(Self {
            agents,
            voting,
            voting_context: VotingContext::new(),
            options: WorkflowOptions::default(),
            progress: None,
        })
    }

    /// Override the voting context (builder pattern).
    pub fn with_voting_context(mut self, context: VotingContext) -> Self {
        self.voting_context = context;
        self
    }

    /// Override the execution options (builder pattern).
    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a progress handler (builder pattern).
    pub fn with_progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    /// The registered agents, in registration order.
    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    async fn emit(&self, stage: WorkflowStage, message: impl Into<String>, completed: usize, agent: Option<String>) {
        if let Some(handler) = &self.progress {
            handler
                .on_workflow_progress(&WorkflowProgress {
                    stage,
                    message: message.into(),
                    completed_agents: completed,
                    total_agents: self.agents.len(),
                    current_agent_id: agent,
                })
                .await;
        }
    }

    /// Execute with free-form output; the extracted value is the winning text.
    pub async fn execute(&self, task: &str, cancel: &CancellationToken) -> WorkflowResult<String> {
        let outcome = self.run(task, None, cancel).await;
        let value = if outcome.success {
            outcome
                .voting_result
                .as_ref()
                .map(|v| v.winning_response.clone())
        } else {
            None
        };
        WorkflowResult {
            success: outcome.success,
            value,
            agent_responses: outcome.agent_responses,
            voting_result: outcome.voting_result,
            elapsed: outcome.elapsed,
            error: outcome.error,
        }
    }

    /// Execute with structured output; agents are invoked through
    /// [`Agent::process_structured`] and the winning structured output is
    /// deserialized into `T`.  A winning result whose structured output is
    /// missing or does not match `T` yields `value: None` on a successful run.
    pub async fn execute_structured<T: DeserializeOwned>(
        &self,
        task: &str,
        schema: &SchemaHint,
        cancel: &CancellationToken,
    ) -> WorkflowResult<T> {
        let outcome = self.run(task, Some(schema), cancel).await;
        let value = if outcome.success {
            outcome
                .voting_result
                .as_ref()
                .and_then(|v| v.winning_structured.clone())
                .and_then(|v| serde_json::from_value(v).ok())
        } else {
            None
        };
        WorkflowResult {
            success: outcome.success,
            value,
            agent_responses: outcome.agent_responses,
            voting_result: outcome.voting_result,
            elapsed: outcome.elapsed,
            error: outcome.error,
        }
    }

    async fn run(
        &self,
        task: &str,
        schema: Option<&SchemaHint>,
        cancel: &CancellationToken,
    ) -> WorkflowResult<()> {
        let started = Instant::now();
        self.emit(WorkflowStage::Initializing, "initializing workflow", 0, None)
            .await;

        let responses = if self.options.enable_parallel_execution {
            match self.gather_parallel(task, schema, cancel).await {
                Ok(responses) => responses,
                Err(failure) => {
                    self.emit(WorkflowStage::Failed, failure.clone(), 0, None).await;
                    return WorkflowResult::failure(failure, Vec::new(), started.elapsed());
                }
            }
        } else {
            match self.gather_sequential(task, schema, cancel).await {
                Ok(responses) => responses,
                Err((failure, partial)) => {
                    self.emit(WorkflowStage::Failed, failure.clone(), partial.len(), None)
                        .await;
                    return WorkflowResult::failure(failure, partial, started.elapsed());
                }
            }
        };

        if cancel.is_cancelled() {
            return WorkflowResult::failure(
                "Workflow was cancelled",
                responses,
                started.elapsed(),
            );
        }
        if responses.is_empty() {
            return WorkflowResult::failure(
                "No agent responses received",
                responses,
                started.elapsed(),
            );
        }

        self.emit(
            WorkflowStage::Voting,
            format!("voting over {} responses", responses.len()),
            responses.len(),
            None,
        )
        .await;

        let mut voting_result = match self
            .voting
            .reconcile(task, &responses, &self.voting_context)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                let failure = format!("voting failed: {}", err);
                self.emit(WorkflowStage::Failed, failure.clone(), responses.len(), None)
                    .await;
                return WorkflowResult::failure(failure, responses, started.elapsed());
            }
        };

        // Consensus retry: the consensus strategy's own no-arbiter fallback may
        // still score below the threshold; no further retry is attempted.
        if self.options.require_consensus
            && voting_result.consensus_score < self.options.minimum_consensus_score
        {
            self.emit(
                WorkflowStage::ConsensusBuilding,
                format!(
                    "consensus {:.2} below required {:.2}, synthesizing",
                    voting_result.consensus_score, self.options.minimum_consensus_score
                ),
                responses.len(),
                None,
            )
            .await;
            voting_result = match ConsensusVoting
                .reconcile(task, &responses, &self.voting_context)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    let failure = format!("consensus building failed: {}", err);
                    self.emit(WorkflowStage::Failed, failure.clone(), responses.len(), None)
                        .await;
                    return WorkflowResult::failure(failure, responses, started.elapsed());
                }
            };
        }

        self.emit(WorkflowStage::Finalizing, "extracting result", responses.len(), None)
            .await;
        self.emit(WorkflowStage::Completed, "workflow complete", responses.len(), None)
            .await;

        WorkflowResult {
            success: true,
            value: Some(()),
            agent_responses: responses,
            voting_result: Some(voting_result),
            elapsed: started.elapsed(),
            error: None,
        }
    }

    /// Concurrent fan-out with a deadline linked to the caller's cancellation.
    async fn gather_parallel(
        &self,
        task: &str,
        schema: Option<&SchemaHint>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentResponse>, String> {
        let completed = Arc::new(AtomicUsize::new(0));

        let fan_out = futures_util::future::join_all(self.agents.iter().map(|agent| {
            let completed = Arc::clone(&completed);
            let agent = Arc::clone(agent);
            async move {
                self.emit(
                    WorkflowStage::AgentProcessing,
                    format!("agent '{}' processing", agent.id),
                    completed.load(Ordering::SeqCst),
                    Some(agent.id.clone()),
                )
                .await;

                let response = match schema {
                    Some(schema) => agent.process_structured(task, schema, &[], cancel).await,
                    None => agent.process(task, &[], cancel).await,
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(
                    WorkflowStage::AgentProcessing,
                    format!("agent '{}' complete", agent.id),
                    done,
                    Some(agent.id.clone()),
                )
                .await;
                response
            }
        }));

        match self.options.timeout {
            Some(deadline) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err("Workflow was cancelled".to_string()),
                gathered = tokio::time::timeout(deadline, fan_out) => match gathered {
                    Ok(responses) => Ok(responses),
                    Err(_) => {
                        if cancel.is_cancelled() {
                            Err("Workflow was cancelled".to_string())
                        } else {
                            Err(format!("Workflow timed out after {:?}", deadline))
                        }
                    }
                },
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err("Workflow was cancelled".to_string()),
                responses = fan_out => Ok(responses),
            },
        }
    }

    /// Sequential fan-out in registration order, observing cancellation between
    /// agents.  Returns the partial responses alongside the failure message.
    async fn gather_sequential(
        &self,
        task: &str,
        schema: Option<&SchemaHint>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentResponse>, (String, Vec<AgentResponse>)> {
        let mut responses = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            if cancel.is_cancelled() {
                return Err(("Workflow was cancelled".to_string(), responses));
            }
            self.emit(
                WorkflowStage::AgentProcessing,
                format!("agent '{}' processing", agent.id),
                responses.len(),
                Some(agent.id.clone()),
            )
            .await;

            let response = match schema {
                Some(schema) => agent.process_structured(task, schema, &[], cancel).await,
                None => agent.process(task, &[], cancel).await,
            };
            responses.push(response);

            self.emit(
                WorkflowStage::AgentProcessing,
                format!("agent '{}' complete", agent.id),
                responses.len(),
                Some(agent.id.clone()),
            )
            .await;
        }
        Ok(responses)
    }
}
