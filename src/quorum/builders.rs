//! Fluent builders for agents, workflows, and deliberations.
//!
//! Builders validate at [`build`](WorkflowBuilder::build) time and fail
//! synchronously with configuration errors — a workflow or deliberation with
//! no agents never gets as far as execution.  [`WorkflowBuilder::with_deliberation`]
//! hands the accumulated agents and voting setup over to a
//! [`DeliberationBuilder`] for multi-round execution under a budget.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::builders::WorkflowBuilder;
//! use quorum::agent::Agent;
//! use quorum::clients::openai::OpenAIClient;
//! use quorum::deliberation::DeliberationMode;
//! use quorum::voting::StrategyKind;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = Arc::new(OpenAIClient::new("key", "gpt-4o"));
//!
//! let deliberation = WorkflowBuilder::new()
//!     .agent(Agent::new("a1", "Analyst", client.clone()))
//!     .agent(Agent::new("a2", "Critic", client))
//!     .voting(StrategyKind::Weighted)
//!     .with_deliberation(|builder| {
//!         builder
//!             .mode(DeliberationMode::Debate)
//!             .max_rounds(6)
//!             .max_time(Duration::from_secs(120))
//!             .convergence_threshold(0.85)
//!     })
//!     .unwrap();
//! ```

use crate::agent::Agent;
use crate::client_wrapper::{ClientWrapper, CompletionOptions};
use crate::context::ContextManager;
use crate::convergence::ConvergenceCalculator;
use crate::deliberation::{BudgetHints, Deliberation, DeliberationMode};
use crate::error::EngineError;
use crate::event::ProgressHandler;
use crate::personality::Personality;
use crate::termination::{
    CompositeTermination, ConvergenceTermination, MaxRounds, MaxTime, MaxTokens,
    TerminationStrategy,
};
use crate::tool::AgentTool;
use crate::voting::{strategy_for, StrategyKind, VotingContext, VotingStrategy};
use crate::workflow::{Workflow, WorkflowOptions};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Fluent construction of one [`Agent`].
pub struct AgentBuilder {
    id: String,
    name: String,
    client: Arc<dyn ClientWrapper>,
    personality: Option<Personality>,
    preset_error: Option<String>,
    tools: Vec<AgentTool>,
    default_options: CompletionOptions,
}

impl AgentBuilder {
    /// Start building an agent with the mandatory identity information.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            client,
            personality: None,
            preset_error: None,
            tools: Vec::new(),
            default_options: CompletionOptions::default(),
        }
    }

    /// Attach a personality.
    pub fn personality(mut self, personality: Personality) -> Self {
        self.personality = Some(personality);
        self
    }

    /// Attach a personality by preset key (`analyst`, `critic`,
    /// `expert:<domain>`, …).  Unknown keys fail at build.
    pub fn preset(mut self, key: &str) -> Self {
        match Personality::from_preset(key) {
            Some(personality) => self.personality = Some(personality),
            None => self.preset_error = Some(key.to_string()),
        }
        self
    }

    /// Add a tool.  Tool names must be unique; duplicates fail at build.
    pub fn tool(mut self, tool: AgentTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Override the agent's default completion options.
    pub fn default_options(mut self, options: CompletionOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Finalise the agent.
    pub fn build(self) -> Result<Agent, EngineError> {
        if let Some(key) = self.preset_error {
            return Err(EngineError::Configuration(format!(
                "unknown personality preset '{}'",
                key
            )));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.definition.name.clone()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate tool name '{}' on agent '{}'",
                    tool.definition.name, self.id
                )));
            }
        }

        let mut agent = Agent::new(self.id, self.name, self.client)
            .with_tools(self.tools)
            .with_default_options(self.default_options);
        if let Some(personality) = self.personality {
            agent = agent.with_personality(personality);
        }
        Ok(agent)
    }
}

/// Fluent construction of a single-shot [`Workflow`].
pub struct WorkflowBuilder {
    agents: Vec<Arc<Agent>>,
    voting: Option<Arc<dyn VotingStrategy>>,
    voting_context: VotingContext,
    options: WorkflowOptions,
    progress: Option<Arc<dyn ProgressHandler>>,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBuilder {
    /// An empty builder; voting defaults to majority.
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            voting: None,
            voting_context: VotingContext::new(),
            options: WorkflowOptions::default(),
            progress: None,
        }
    }

    /// Add an agent.
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    /// Add an already-shared agent.
    pub fn shared_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Select a built-in voting strategy by tag.
    pub fn voting(mut self, kind: StrategyKind) -> Self {
        self.voting = Some(strategy_for(kind));
        self
    }

    /// Install a custom voting strategy.
    pub fn voting_strategy(mut self, strategy: Arc<dyn VotingStrategy>) -> Self {
        self.voting = Some(strategy);
        self
    }

    /// Override the voting context (weights, threshold, arbiter).
    pub fn voting_context(mut self, context: VotingContext) -> Self {
        self.voting_context = context;
        self
    }

    /// Run agents sequentially instead of in parallel.
    pub fn sequential(mut self) -> Self {
        self.options.enable_parallel_execution = false;
        self
    }

    /// Deadline for the parallel fan-out.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Require the given consensus score, retrying with the consensus strategy
    /// when the first vote falls short.
    pub fn require_consensus(mut self, minimum_score: f64) -> Self {
        self.options.require_consensus = true;
        self.options.minimum_consensus_score = minimum_score;
        self
    }

    /// Attach a progress handler.
    pub fn progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    /// Finalise the workflow.
    pub fn build(self) -> Result<Workflow, EngineError> {
        let voting = self
            .voting
            .unwrap_or_else(|| strategy_for(StrategyKind::Majority));
        let mut workflow = Workflow::new(self.agents, voting)?
            .with_voting_context(self.voting_context)
            .with_options(self.options);
        if let Some(progress) = self.progress {
            workflow = workflow.with_progress_handler(progress);
        }
        Ok(workflow)
    }

    /// Hand the accumulated agents and voting setup over to a
    /// [`DeliberationBuilder`] and build the deliberation it configures.
    pub fn with_deliberation(
        self,
        configure: impl FnOnce(DeliberationBuilder) -> DeliberationBuilder,
    ) -> Result<Deliberation, EngineError> {
        let voting = self
            .voting
            .unwrap_or_else(|| strategy_for(StrategyKind::Majority));
        let builder = DeliberationBuilder {
            agents: self.agents,
            voting,
            voting_context: self.voting_context,
            mode: DeliberationMode::default(),
            strategies: Vec::new(),
            convergence: None,
            context_manager: None,
            progress: self.progress,
            hints: BudgetHints::default(),
        };
        configure(builder).build()
    }
}

/// Fluent construction of a multi-round [`Deliberation`].
pub struct DeliberationBuilder {
    agents: Vec<Arc<Agent>>,
    voting: Arc<dyn VotingStrategy>,
    voting_context: VotingContext,
    mode: DeliberationMode,
    strategies: Vec<Arc<dyn TerminationStrategy>>,
    convergence: Option<Arc<dyn ConvergenceCalculator>>,
    context_manager: Option<Arc<dyn ContextManager>>,
    progress: Option<Arc<dyn ProgressHandler>>,
    hints: BudgetHints,
}

impl DeliberationBuilder {
    /// Start from scratch (rather than from a [`WorkflowBuilder`]).
    pub fn new(voting: Arc<dyn VotingStrategy>) -> Self {
        Self {
            agents: Vec::new(),
            voting,
            voting_context: VotingContext::new(),
            mode: DeliberationMode::default(),
            strategies: Vec::new(),
            convergence: None,
            context_manager: None,
            progress: None,
            hints: BudgetHints::default(),
        }
    }

    /// Add an agent.
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    /// Add an already-shared agent.
    pub fn shared_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Select the round mode.
    pub fn mode(mut self, mode: DeliberationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound the deliberation to `n` completed rounds.
    pub fn max_rounds(mut self, n: u32) -> Self {
        self.strategies.push(Arc::new(MaxRounds::new(n)));
        self.hints.max_rounds = Some(n);
        self
    }

    /// Bound the deliberation to `n` total tokens.
    pub fn max_tokens(mut self, n: usize) -> Self {
        self.strategies.push(Arc::new(MaxTokens::new(n)));
        self.hints.max_tokens = Some(n);
        self
    }

    /// Bound the deliberation's wall-clock time.
    pub fn max_time(mut self, limit: Duration) -> Self {
        self.strategies.push(Arc::new(MaxTime::new(limit)));
        self.hints.max_time = Some(limit);
        self
    }

    /// Stop once convergence crosses `threshold` (minimum two completed rounds).
    pub fn convergence_threshold(mut self, threshold: f64) -> Self {
        self.strategies
            .push(Arc::new(ConvergenceTermination::new(threshold)));
        self.hints.convergence_threshold = Some(threshold);
        self
    }

    /// Add an arbitrary termination strategy.  Strategies are checked in the
    /// order they were added; put cheap bounds before LLM-backed judges.
    pub fn termination(mut self, strategy: Arc<dyn TerminationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Override the convergence calculator.
    pub fn convergence_calculator(mut self, calculator: Arc<dyn ConvergenceCalculator>) -> Self {
        self.convergence = Some(calculator);
        self
    }

    /// Install a context manager.
    pub fn context_manager(mut self, manager: Arc<dyn ContextManager>) -> Self {
        self.context_manager = Some(manager);
        self
    }

    /// Override the voting context used at synthesis.
    pub fn voting_context(mut self, context: VotingContext) -> Self {
        self.voting_context = context;
        self
    }

    /// Attach a progress handler.
    pub fn progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    /// Finalise the deliberation.
    ///
    /// A builder with no termination strategies gets a `MaxRounds(10)` budget
    /// so an unconfigured deliberation cannot run unbounded.
    pub fn build(mut self) -> Result<Deliberation, EngineError> {
        if self.strategies.is_empty() {
            self.strategies.push(Arc::new(MaxRounds::new(10)));
            self.hints.max_rounds = Some(10);
        }
        let mut composite = CompositeTermination::any();
        for strategy in self.strategies {
            composite = composite.with_shared(strategy);
        }

        let mut deliberation =
            Deliberation::new(self.agents, self.voting, Arc::new(composite))?
                .with_mode(self.mode)
                .with_voting_context(self.voting_context)
                .with_budget_hints(self.hints);
        if let Some(convergence) = self.convergence {
            deliberation = deliberation.with_convergence(convergence);
        }
        if let Some(manager) = self.context_manager {
            deliberation = deliberation.with_context_manager(manager);
        }
        if let Some(progress) = self.progress {
            deliberation = deliberation.with_progress_handler(progress);
        }
        Ok(deliberation)
    }
}
