//! Multi-round deliberation executor.
//!
//! A deliberation runs repeated conversational rounds among a fixed set of
//! agents under a composite termination budget, with an optional context
//! manager bounding what each agent observes per round.
//!
//! # State machine
//!
//! ```text
//! S0 Init → S1 CheckTerminate → (terminate? → S5 Synthesize → Done)
//!                               (continue  → S2 AdvanceRound → S3 RunRound → S4 Convergence → S1)
//! ```
//!
//! Termination is evaluated **before** the round counter is incremented, so a
//! `MaxRounds(5)` budget stops after five completed rounds.  Synthesis runs the
//! configured voting strategy over the last round's responses (or the most
//! recent message per agent when the last round is empty).
//!
//! # Round modes
//!
//! - [`RoundRobin`](DeliberationMode::RoundRobin) — agents speak sequentially;
//!   each turn is appended before the next agent speaks.
//! - [`Debate`](DeliberationMode::Debate) — agents speak concurrently, each
//!   addressing the previous round's opposing arguments.
//! - [`Moderated`](DeliberationMode::Moderated) — a moderator frames each round,
//!   participants reply to it sequentially.  Falls back to round-robin when no
//!   moderator is configured.
//! - [`FreeForm`](DeliberationMode::FreeForm) — agents speak concurrently, each
//!   seeing the full prior transcript.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::agent::Agent;
//! use quorum::clients::openai::OpenAIClient;
//! use quorum::deliberation::{Deliberation, DeliberationMode};
//! use quorum::termination::{CompositeTermination, ConvergenceTermination, MaxRounds};
//! use quorum::voting::MajorityVoting;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async {
//! let client = Arc::new(OpenAIClient::new("key", "gpt-4o"));
//! let agents = vec![
//!     Arc::new(Agent::new("opt", "Optimist", client.clone())),
//!     Arc::new(Agent::new("pes", "Pessimist", client)),
//! ];
//!
//! let deliberation = Deliberation::new(
//!     agents,
//!     Arc::new(MajorityVoting),
//!     Arc::new(
//!         CompositeTermination::any()
//!             .with(MaxRounds::new(6))
//!             .with(ConvergenceTermination::new(0.85)),
//!     ),
//! )
//! .unwrap()
//! .with_mode(DeliberationMode::Debate);
//!
//! let result = deliberation
//!     .execute("Is microservices the right call here?", &CancellationToken::new())
//!     .await;
//! println!("{:?}", result.value);
//! # };
//! ```

use crate::agent::{Agent, AgentResponse};
use crate::client_wrapper::Message;
use crate::context::{estimate_tokens, ContextManager};
use crate::convergence::{ConvergenceCalculator, TokenSimilarityCalculator};
use crate::error::EngineError;
use crate::event::{DeliberationProgress, DeliberationStage, ProgressHandler};
use crate::termination::{TerminationReason, TerminationStrategy};
use crate::voting::{VotingContext, VotingResult, VotingStrategy};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One immutable entry in a deliberation transcript.
#[derive(Debug, Clone)]
pub struct DeliberationMessage {
    /// Agent that produced the message (`"system"` for synthetic entries).
    pub agent_id: String,
    /// Display name of the producer.
    pub agent_name: String,
    /// Message body.
    pub content: String,
    /// Round the message belongs to; rounds start at 1.
    pub round: u32,
    /// Append time.  Non-decreasing within a round per agent.
    pub timestamp: DateTime<Utc>,
    /// Agent this message directly responds to, when the mode tracks it.
    pub in_response_to: Option<String>,
    /// Provider-reported token count, or an estimate when the provider gave
    /// none.  `0` means "estimate from content on demand".
    pub token_count: usize,
}

/// Mutable state owned by exactly one deliberation execution.
///
/// The transcript is append-only and mutated only from the executor's single
/// control flow; concurrent round modes hand their results back to the
/// executor, which appends them serially in invocation order.
#[derive(Debug, Clone)]
pub struct DeliberationState {
    /// Unique id of this execution.
    pub id: Uuid,
    /// The original task.
    pub task: String,
    /// Current round; advances only at round start, `0` before round 1.
    pub current_round: u32,
    /// Total tokens consumed so far.
    pub total_tokens_used: usize,
    /// Ordered, append-only transcript.
    pub transcript: Vec<DeliberationMessage>,
    /// Transcript indices per agent, covering every agent that has spoken.
    pub positions: HashMap<String, Vec<usize>>,
    /// Most recent convergence score, once computed.
    pub convergence_score: Option<f64>,
    /// Whether the last computed score crossed the configured threshold.
    pub converged: bool,
    /// Agent currently (or most recently) speaking.
    pub current_speaker: Option<String>,
    /// Participating agent ids, in registration order.
    pub agent_ids: Vec<String>,
    started: Instant,
}

impl DeliberationState {
    /// Fresh state for a task.  The executor builds one per run; exposing the
    /// constructor lets custom termination strategies be tested in isolation.
    pub fn new(task: &str, agent_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.to_string(),
            current_round: 0,
            total_tokens_used: 0,
            transcript: Vec::new(),
            positions: HashMap::new(),
            convergence_score: None,
            converged: false,
            current_speaker: None,
            agent_ids,
            started: Instant::now(),
        }
    }

    /// Wall-clock time since the deliberation started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Messages belonging to `round`, in transcript order.
    pub fn messages_in_round(&self, round: u32) -> impl Iterator<Item = &DeliberationMessage> {
        self.transcript.iter().filter(move |m| m.round == round)
    }

    /// The agent's last message in `round`, if it spoke.
    pub fn last_message_of(&self, agent_id: &str, round: u32) -> Option<&DeliberationMessage> {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.agent_id == agent_id && m.round == round)
    }

    /// The agent's most recent message in any round.
    pub fn latest_message_of(&self, agent_id: &str) -> Option<&DeliberationMessage> {
        self.positions
            .get(agent_id)
            .and_then(|indices| indices.last())
            .map(|&i| &self.transcript[i])
    }

    /// Append a message, recording the producer's position and charging its
    /// token count.
    fn append(&mut self, msg: DeliberationMessage) {
        self.total_tokens_used += msg.token_count;
        self.positions
            .entry(msg.agent_id.clone())
            .or_default()
            .push(self.transcript.len());
        self.transcript.push(msg);
    }
}

/// Turn-taking discipline for a round.
#[derive(Clone, Default)]
pub enum DeliberationMode {
    /// Agents speak sequentially in registration order.
    #[default]
    RoundRobin,
    /// Agents speak concurrently, each addressing the previous round's
    /// opposing arguments.
    Debate,
    /// A moderator frames each round; participants reply to it sequentially.
    /// With no moderator the executor falls back to [`RoundRobin`](Self::RoundRobin).
    Moderated {
        /// The moderator agent, distinct from the participants.
        moderator: Option<Arc<Agent>>,
    },
    /// Agents speak concurrently, each seeing the full prior transcript.
    FreeForm,
}

/// Outcome of one deliberation execution.
#[derive(Debug)]
pub struct DeliberationResult<T> {
    /// Whether the deliberation ran to synthesis.
    pub success: bool,
    /// The extracted output (winning text for `T = String`).
    pub value: Option<T>,
    /// Final state, preserved even on failure or cancellation.
    pub state: DeliberationState,
    /// Why the deliberation stopped.
    pub termination_reason: TerminationReason,
    /// Completed rounds.
    pub total_rounds: u32,
    /// Total tokens consumed.
    pub total_tokens: usize,
    /// Wall-clock duration.
    pub total_time: Duration,
    /// Last computed convergence score.
    pub final_convergence_score: Option<f64>,
    /// The synthesis vote, when one ran.
    pub voting_result: Option<VotingResult>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

/// Budget hints surfaced on progress events (purely informational; the actual
/// budgets live in the termination composite).
#[derive(Debug, Clone, Default)]
pub struct BudgetHints {
    /// Round bound, when known.
    pub max_rounds: Option<u32>,
    /// Token bound, when known.
    pub max_tokens: Option<usize>,
    /// Time bound, when known.
    pub max_time: Option<Duration>,
    /// Convergence threshold, when known.
    pub convergence_threshold: Option<f64>,
}

/// The multi-round executor.
pub struct Deliberation {
    agents: Vec<Arc<Agent>>,
    mode: DeliberationMode,
    voting: Arc<dyn VotingStrategy>,
    voting_context: VotingContext,
    termination: Arc<dyn TerminationStrategy>,
    convergence: Arc<dyn ConvergenceCalculator>,
    context_manager: Option<Arc<dyn ContextManager>>,
    progress: Option<Arc<dyn ProgressHandler>>,
    hints: BudgetHints,
}

impl std::fmt::Debug for Deliberation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deliberation")
            .field("agents", &self.agents.len())
            .field("hints", &self.hints)
            .finish_non_exhaustive()
    }
}

impl Deliberation {
    /// Build a deliberation over the given agents, synthesis strategy, and
    /// termination composite.
    ///
    /// Fails synchronously with a configuration error when `agents` is empty.
    /// Convergence defaults to [`TokenSimilarityCalculator`].
    pub fn new(
        agents: Vec<Arc<Agent>>,
        voting: Arc<dyn VotingStrategy>,
        termination: Arc<dyn TerminationStrategy>,
    ) -> Result<Self, EngineError> {
        if agents.is_empty() {
            return Err(EngineError::Configuration(
                "cannot build a deliberation with no agents".to_string(),
            ));
        }
        Ok(Self {
            agents,
            mode: DeliberationMode::default(),
            voting,
            voting_context: VotingContext::new(),
            termination,
            convergence: Arc::new(TokenSimilarityCalculator::new()),
            context_manager: None,
            progress: None,
            hints: BudgetHints::default(),
        })
    }

    /// Select the round mode (builder pattern).
    pub fn with_mode(mut self, mode: DeliberationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the convergence calculator (builder pattern).
    pub fn with_convergence(mut self, calculator: Arc<dyn ConvergenceCalculator>) -> Self {
        self.convergence = calculator;
        self
    }

    /// Install a context manager shaping each agent's observable history
    /// (builder pattern).
    pub fn with_context_manager(mut self, manager: Arc<dyn ContextManager>) -> Self {
        self.context_manager = Some(manager);
        self
    }

    /// Override the voting context used at synthesis (builder pattern).
    pub fn with_voting_context(mut self, context: VotingContext) -> Self {
        self.voting_context = context;
        self
    }

    /// Attach a progress handler (builder pattern).
    pub fn with_progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    /// Attach budget hints surfaced on progress events (builder pattern).
    pub fn with_budget_hints(mut self, hints: BudgetHints) -> Self {
        self.hints = hints;
        self
    }

    /// The participating agents, in registration order.
    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    async fn emit(
        &self,
        stage: DeliberationStage,
        state: &DeliberationState,
        message: impl Into<String>,
    ) {
        if let Some(handler) = &self.progress {
            handler
                .on_deliberation_progress(&DeliberationProgress {
                    stage,
                    current_round: state.current_round,
                    max_rounds: self.hints.max_rounds,
                    current_speaker: state.current_speaker.clone(),
                    tokens_used: state.total_tokens_used,
                    token_budget: self.hints.max_tokens,
                    elapsed: state.elapsed(),
                    time_budget: self.hints.max_time,
                    convergence_score: state.convergence_score,
                    convergence_threshold: self.hints.convergence_threshold,
                    message: message.into(),
                })
                .await;
        }
    }

    /// Execute with free-form output; the value is the synthesis winner's text.
    pub async fn execute(
        &self,
        task: &str,
        cancel: &CancellationToken,
    ) -> DeliberationResult<String> {
        let outcome = self.run(task, cancel).await;
        let value = if outcome.success {
            outcome
                .voting_result
                .as_ref()
                .map(|v| v.winning_response.clone())
        } else {
            None
        };
        DeliberationResult {
            success: outcome.success,
            value,
            state: outcome.state,
            termination_reason: outcome.termination_reason,
            total_rounds: outcome.total_rounds,
            total_tokens: outcome.total_tokens,
            total_time: outcome.total_time,
            final_convergence_score: outcome.final_convergence_score,
            voting_result: outcome.voting_result,
            error: outcome.error,
        }
    }

    /// Execute and deserialize the winning structured output into `T`.
    /// The value is `None` on a successful run whose winner carried no
    /// matching structured output.
    pub async fn execute_structured<T: serde::de::DeserializeOwned>(
        &self,
        task: &str,
        cancel: &CancellationToken,
    ) -> DeliberationResult<T> {
        let outcome = self.run(task, cancel).await;
        let value = if outcome.success {
            outcome
                .voting_result
                .as_ref()
                .and_then(|v| v.winning_structured.clone())
                .and_then(|v| serde_json::from_value(v).ok())
        } else {
            None
        };
        DeliberationResult {
            success: outcome.success,
            value,
            state: outcome.state,
            termination_reason: outcome.termination_reason,
            total_rounds: outcome.total_rounds,
            total_tokens: outcome.total_tokens,
            total_time: outcome.total_time,
            final_convergence_score: outcome.final_convergence_score,
            voting_result: outcome.voting_result,
            error: outcome.error,
        }
    }

    async fn run(&self, task: &str, cancel: &CancellationToken) -> DeliberationResult<()> {
        let mut state =
            DeliberationState::new(task, self.agents.iter().map(|a| a.id.clone()).collect());
        self.emit(DeliberationStage::Initializing, &state, "deliberation starting")
            .await;

        let stop_reason;
        loop {
            // S1: check termination before advancing the round.
            if cancel.is_cancelled() {
                return Self::cancelled(state);
            }
            self.emit(
                DeliberationStage::CheckingTermination,
                &state,
                "checking termination",
            )
            .await;
            let decision = match self.termination.check(&state, cancel).await {
                Ok(decision) => decision,
                Err(err) => return self.failed(state, err).await,
            };
            if decision.should_terminate {
                log::info!(
                    "deliberation {}: terminating after round {} ({:?}: {})",
                    state.id,
                    state.current_round,
                    decision.reason,
                    decision.explanation
                );
                stop_reason = decision.reason;
                break;
            }

            // S2: advance the round.
            state.current_round += 1;
            self.emit(
                DeliberationStage::RoundStarting,
                &state,
                format!("round {} starting", state.current_round),
            )
            .await;

            // S3: run the round in the configured mode.
            let round_result = match &self.mode {
                DeliberationMode::RoundRobin => self.run_round_robin(&mut state, cancel).await,
                DeliberationMode::Debate => self.run_debate(&mut state, cancel).await,
                DeliberationMode::Moderated { moderator } => match moderator {
                    Some(moderator) => {
                        self.run_moderated(&mut state, moderator, cancel).await
                    }
                    None => self.run_round_robin(&mut state, cancel).await,
                },
                DeliberationMode::FreeForm => self.run_free_form(&mut state, cancel).await,
            };
            match round_result {
                Ok(()) => {}
                Err(RoundError::Cancelled) => return Self::cancelled(state),
                Err(RoundError::Engine(err)) => return self.failed(state, err).await,
            }
            state.current_speaker = None;
            self.emit(
                DeliberationStage::RoundComplete,
                &state,
                format!("round {} complete", state.current_round),
            )
            .await;

            // S4: convergence, evaluated after the round's messages are appended.
            self.emit(
                DeliberationStage::EvaluatingConvergence,
                &state,
                "evaluating convergence",
            )
            .await;
            match self.convergence.score(&state).await {
                Ok(score) => {
                    state.convergence_score = Some(score);
                    if let Some(threshold) = self.hints.convergence_threshold {
                        state.converged = score >= threshold;
                    }
                }
                Err(err) => return self.failed(state, err).await,
            }
        }

        // S5: synthesize via the configured voting strategy.
        self.emit(DeliberationStage::Synthesizing, &state, "synthesizing result")
            .await;
        let candidates = self.synthesis_candidates(&state);
        let voting_result = match self
            .voting
            .reconcile(task, &candidates, &self.voting_context)
            .await
        {
            Ok(result) => result,
            Err(err) => return self.failed(state, err).await,
        };

        self.emit(DeliberationStage::Complete, &state, "deliberation complete")
            .await;
        DeliberationResult {
            success: true,
            value: Some(()),
            termination_reason: stop_reason,
            total_rounds: state.current_round,
            total_tokens: state.total_tokens_used,
            total_time: state.elapsed(),
            final_convergence_score: state.convergence_score,
            voting_result: Some(voting_result),
            error: None,
            state,
        }
    }

    fn cancelled(state: DeliberationState) -> DeliberationResult<()> {
        DeliberationResult {
            success: false,
            value: None,
            termination_reason: TerminationReason::ManualStop,
            total_rounds: state.current_round,
            total_tokens: state.total_tokens_used,
            total_time: state.elapsed(),
            final_convergence_score: state.convergence_score,
            voting_result: None,
            error: Some("Deliberation was cancelled".to_string()),
            state,
        }
    }

    async fn failed(&self, state: DeliberationState, err: EngineError) -> DeliberationResult<()> {
        self.emit(DeliberationStage::Failed, &state, err.to_string()).await;
        DeliberationResult {
            success: false,
            value: None,
            termination_reason: TerminationReason::NotTerminated,
            total_rounds: state.current_round,
            total_tokens: state.total_tokens_used,
            total_time: state.elapsed(),
            final_convergence_score: state.convergence_score,
            voting_result: None,
            error: Some(err.to_string()),
            state,
        }
    }

    /// Synthesis inputs: the last round's responses, or each agent's most
    /// recent message when the last round produced nothing.
    fn synthesis_candidates(&self, state: &DeliberationState) -> Vec<AgentResponse> {
        let mut candidates: Vec<AgentResponse> = state
            .messages_in_round(state.current_round)
            .filter(|m| state.agent_ids.contains(&m.agent_id))
            .map(|m| Self::message_to_response(m))
            .collect();
        if candidates.is_empty() {
            candidates = state
                .agent_ids
                .iter()
                .filter_map(|id| state.latest_message_of(id))
                .map(Self::message_to_response)
                .collect();
        }
        candidates
    }

    fn message_to_response(msg: &DeliberationMessage) -> AgentResponse {
        AgentResponse {
            agent_id: msg.agent_id.clone(),
            agent_name: msg.agent_name.clone(),
            content: msg.content.clone(),
            structured: None,
            confidence: None,
            elapsed: Duration::ZERO,
            usage: None,
        }
    }

    /// The system message describing the deliberation and its participants.
    fn participants_message(&self) -> Message {
        let mut description = String::from(
            "You are taking part in a multi-agent deliberation. Participants:",
        );
        for agent in &self.agents {
            let _ = write!(description, "\n- {}", agent.name);
            if !agent.personality.description.is_empty() {
                let _ = write!(description, " ({})", agent.personality.description);
            }
        }
        Message::system(description)
    }

    /// Build the context message list for one agent: the participants system
    /// message, then (when a manager is installed and the transcript is
    /// non-empty) an optional summary system message plus the projected
    /// transcript.
    async fn context_for(
        &self,
        state: &DeliberationState,
        agent_id: &str,
    ) -> Result<Vec<Message>, EngineError> {
        let mut context = vec![self.participants_message()];
        let Some(manager) = &self.context_manager else {
            return Ok(context);
        };
        if state.transcript.is_empty() {
            return Ok(context);
        }

        let window = manager.project(&state.transcript, agent_id).await?;
        if let Some(summary) = &window.summary {
            context.push(Message::system(format!("[Context Summary] {}", summary)));
        }
        for msg in &window.messages {
            context.push(Message::assistant(format!("[{}]: {}", msg.agent_name, msg.content)));
        }
        Ok(context)
    }

    /// Wrap a finished agent turn into a transcript message.  Token counts use
    /// the provider's report when present, otherwise `⌈chars/4⌉`.
    fn turn_message(
        response: &AgentResponse,
        round: u32,
        in_response_to: Option<String>,
    ) -> DeliberationMessage {
        let token_count = response
            .usage
            .as_ref()
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| estimate_tokens(&response.content));
        DeliberationMessage {
            agent_id: response.agent_id.clone(),
            agent_name: response.agent_name.clone(),
            content: response.content.clone(),
            round,
            timestamp: Utc::now(),
            in_response_to,
            token_count,
        }
    }

    /// Enumerate OTHER agents' messages from `round` for prompt embedding.
    fn other_positions(state: &DeliberationState, round: u32, excluding: &str) -> String {
        let mut out = String::new();
        for msg in state.messages_in_round(round) {
            if msg.agent_id != excluding {
                let _ = write!(out, "[{}]: {}\n\n", msg.agent_name, msg.content);
            }
        }
        out
    }

    // -- Round modes --------------------------------------------------------

    async fn run_round_robin(
        &self,
        state: &mut DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<(), RoundError> {
        let round = state.current_round;
        for agent in &self.agents {
            if cancel.is_cancelled() {
                return Err(RoundError::Cancelled);
            }
            state.current_speaker = Some(agent.id.clone());
            self.emit(
                DeliberationStage::AgentSpeaking,
                state,
                format!("'{}' speaking", agent.name),
            )
            .await;

            let prompt = if round == 1 {
                format!(
                    "The task under deliberation:\n{}\n\nProvide your initial perspective.",
                    state.task
                )
            } else {
                format!(
                    "The task under deliberation:\n{}\n\nConsider the other perspectives \
                     from the previous round:\n{}Refine or defend your position.",
                    state.task,
                    Self::other_positions(state, round - 1, &agent.id)
                )
            };

            let context = self
                .context_for(state, &agent.id)
                .await
                .map_err(RoundError::Engine)?;
            let response = agent.process(&prompt, &context, cancel).await;
            if cancel.is_cancelled() {
                return Err(RoundError::Cancelled);
            }

            // Round-robin charges the prompt estimate on top of the reply.
            state.total_tokens_used += estimate_tokens(&prompt);
            state.append(Self::turn_message(&response, round, None));
        }
        Ok(())
    }

    async fn run_debate(
        &self,
        state: &mut DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<(), RoundError> {
        let round = state.current_round;

        // Projections and prompts are prepared up front; the fan-out closures
        // never touch the state.
        let mut invocations = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let prompt = if round == 1 {
                format!(
                    "The task under debate:\n{}\n\nState your opening argument.",
                    state.task
                )
            } else {
                format!(
                    "The task under debate:\n{}\n\nArguments to address from the previous \
                     round:\n{}Engage directly with these arguments: acknowledge strong \
                     points and challenge weak ones.",
                    state.task,
                    Self::other_positions(state, round - 1, &agent.id)
                )
            };
            let context = self
                .context_for(state, &agent.id)
                .await
                .map_err(RoundError::Engine)?;
            let opponent = if round > 1 {
                state
                    .messages_in_round(round - 1)
                    .find(|m| m.agent_id != agent.id)
                    .map(|m| m.agent_id.clone())
            } else {
                None
            };
            invocations.push((Arc::clone(agent), prompt, context, opponent));
        }

        self.emit(DeliberationStage::AgentSpeaking, state, "debate round in flight")
            .await;
        let turns = futures_util::future::join_all(invocations.into_iter().map(
            |(agent, prompt, context, opponent)| async move {
                let response = agent.process(&prompt, &context, cancel).await;
                (response, opponent)
            },
        ))
        .await;

        if cancel.is_cancelled() {
            return Err(RoundError::Cancelled);
        }
        // Appended atomically at round end, in invocation order.
        for (response, opponent) in turns {
            state.append(Self::turn_message(&response, round, opponent));
        }
        Ok(())
    }

    async fn run_moderated(
        &self,
        state: &mut DeliberationState,
        moderator: &Arc<Agent>,
        cancel: &CancellationToken,
    ) -> Result<(), RoundError> {
        let round = state.current_round;

        // The moderator frames the round.
        if cancel.is_cancelled() {
            return Err(RoundError::Cancelled);
        }
        state.current_speaker = Some(moderator.id.clone());
        self.emit(
            DeliberationStage::AgentSpeaking,
            state,
            format!("moderator '{}' framing round {}", moderator.name, round),
        )
        .await;

        let moderator_prompt = if round == 1 {
            format!(
                "You are moderating a deliberation on:\n{}\n\nFrame the discussion: \
                 state the key questions the participants should address first.",
                state.task
            )
        } else {
            format!(
                "You are moderating a deliberation on:\n{}\n\nDiscussion from the \
                 previous round:\n{}Summarize where the participants stand and pose \
                 the most important open question for this round.",
                state.task,
                Self::other_positions(state, round - 1, &moderator.id)
            )
        };
        let context = self
            .context_for(state, &moderator.id)
            .await
            .map_err(RoundError::Engine)?;
        let moderator_response = moderator.process(&moderator_prompt, &context, cancel).await;
        if cancel.is_cancelled() {
            return Err(RoundError::Cancelled);
        }
        let moderator_text = moderator_response.content.clone();
        state.append(Self::turn_message(&moderator_response, round, None));

        // Participants reply to the moderator sequentially.
        for agent in &self.agents {
            if cancel.is_cancelled() {
                return Err(RoundError::Cancelled);
            }
            state.current_speaker = Some(agent.id.clone());
            self.emit(
                DeliberationStage::AgentSpeaking,
                state,
                format!("'{}' responding to the moderator", agent.name),
            )
            .await;

            let prompt = format!(
                "The task under deliberation:\n{}\n\nThe moderator says:\n{}\n\n\
                 Respond to the moderator's framing.",
                state.task, moderator_text
            );
            let context = self
                .context_for(state, &agent.id)
                .await
                .map_err(RoundError::Engine)?;
            let response = agent.process(&prompt, &context, cancel).await;
            if cancel.is_cancelled() {
                return Err(RoundError::Cancelled);
            }
            state.append(Self::turn_message(&response, round, Some(moderator.id.clone())));
        }
        Ok(())
    }

    async fn run_free_form(
        &self,
        state: &mut DeliberationState,
        cancel: &CancellationToken,
    ) -> Result<(), RoundError> {
        let round = state.current_round;

        let mut full_transcript = String::new();
        for msg in &state.transcript {
            let _ = write!(
                full_transcript,
                "[{} / round {}]: {}\n\n",
                msg.agent_name, msg.round, msg.content
            );
        }

        let mut invocations = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let prompt = if full_transcript.is_empty() {
                format!(
                    "The task under deliberation:\n{}\n\nShare your opening thoughts.",
                    state.task
                )
            } else {
                format!(
                    "The task under deliberation:\n{}\n\nDiscussion so far:\n{}\
                     Contribute your next thought.",
                    state.task, full_transcript
                )
            };
            let context = self
                .context_for(state, &agent.id)
                .await
                .map_err(RoundError::Engine)?;
            invocations.push((Arc::clone(agent), prompt, context));
        }

        self.emit(DeliberationStage::AgentSpeaking, state, "free-form round in flight")
            .await;
        let turns = futures_util::future::join_all(invocations.into_iter().map(
            |(agent, prompt, context)| async move {
                agent.process(&prompt, &context, cancel).await
            },
        ))
        .await;

        if cancel.is_cancelled() {
            return Err(RoundError::Cancelled);
        }
        for response in turns {
            state.append(Self::turn_message(&response, round, None));
        }
        Ok(())
    }
}

/// Internal round failure discriminating user cancellation from engine errors.
enum RoundError {
    Cancelled,
    Engine(EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(agent: &str, round: u32, content: &str) -> DeliberationMessage {
        DeliberationMessage {
            agent_id: agent.to_string(),
            agent_name: agent.to_string(),
            content: content.to_string(),
            round,
            timestamp: Utc::now(),
            in_response_to: None,
            token_count: 0,
        }
    }

    #[test]
    fn state_append_tracks_positions_and_tokens() {
        let mut state = DeliberationState::new("task", vec!["a1".into(), "a2".into()]);
        let mut msg = message("a1", 1, "twelve chars");
        msg.token_count = 3;
        state.append(msg);
        state.append(message("a2", 1, "reply"));

        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.positions["a1"], vec![0]);
        assert_eq!(state.positions["a2"], vec![1]);
        assert_eq!(state.total_tokens_used, 3);
        assert_eq!(state.latest_message_of("a2").unwrap().content, "reply");
    }

    #[test]
    fn last_message_of_picks_round_specific_entry() {
        let mut state = DeliberationState::new("task", vec!["a1".into()]);
        state.append(message("a1", 1, "first"));
        state.append(message("a1", 2, "second"));
        assert_eq!(state.last_message_of("a1", 1).unwrap().content, "first");
        assert_eq!(state.last_message_of("a1", 2).unwrap().content, "second");
        assert!(state.last_message_of("a1", 3).is_none());
    }

    #[test]
    fn other_positions_excludes_self() {
        let mut state = DeliberationState::new("task", vec!["a1".into(), "a2".into()]);
        state.append(message("a1", 1, "mine"));
        state.append(message("a2", 1, "theirs"));
        let rendered = Deliberation::other_positions(&state, 1, "a1");
        assert!(!rendered.contains("mine"));
        assert!(rendered.contains("theirs"));
    }
}
