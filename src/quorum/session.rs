//! Session façade: a configuration aggregate owning provider clients and agents.
//!
//! A [`Session`] is per-execution configuration, not global state: it holds a
//! set of named [`ClientWrapper`]s and the agents built on them, and can spin
//! up a single-shot workflow on demand via [`Session::quick_execute`].
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::agent::Agent;
//! use quorum::clients::openai::OpenAIClient;
//! use quorum::session::Session;
//! use quorum::voting::StrategyKind;
//! use std::sync::Arc;
//!
//! # async {
//! let client = Arc::new(OpenAIClient::new("key", "gpt-4o"));
//!
//! let mut session = Session::new();
//! session.register_client("openai", client.clone());
//! session.add_agent(Agent::new("a1", "Optimist", client.clone())).unwrap();
//! session.add_agent(Agent::new("a2", "Skeptic", client)).unwrap();
//!
//! let result = session.quick_execute("Ship it?", StrategyKind::Majority).await.unwrap();
//! println!("{:?}", result.value);
//! # };
//! ```

use crate::agent::Agent;
use crate::client_wrapper::ClientWrapper;
use crate::error::EngineError;
use crate::voting::{strategy_for, StrategyKind};
use crate::workflow::{Workflow, WorkflowResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A configuration aggregate of provider clients and agents.
#[derive(Default)]
pub struct Session {
    clients: HashMap<String, Arc<dyn ClientWrapper>>,
    agents: Vec<Arc<Agent>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("clients", &self.clients.keys().collect::<Vec<_>>())
            .field("agents", &self.agents.len())
            .finish()
    }
}

impl Session {
    /// An empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named provider client.  Re-registering a name replaces it.
    pub fn register_client(&mut self, name: impl Into<String>, client: Arc<dyn ClientWrapper>) {
        self.clients.insert(name.into(), client);
    }

    /// Look up a registered client by name.
    pub fn client(&self, name: &str) -> Option<Arc<dyn ClientWrapper>> {
        self.clients.get(name).cloned()
    }

    /// Register an agent.  Agent ids must be unique within the session.
    pub fn add_agent(&mut self, agent: Agent) -> Result<(), EngineError> {
        if self.agents.iter().any(|a| a.id == agent.id) {
            return Err(EngineError::Configuration(format!(
                "agent with id '{}' already exists",
                agent.id
            )));
        }
        self.agents.push(Arc::new(agent));
        Ok(())
    }

    /// The registered agents, in registration order.
    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    /// Look up an agent by id.
    pub fn agent(&self, id: &str) -> Option<&Arc<Agent>> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Build and run a single-shot workflow over every registered agent with
    /// the given reconciliation strategy.
    ///
    /// Fails synchronously with a configuration error when the session has no
    /// agents.
    pub async fn quick_execute(
        &self,
        task: &str,
        strategy: StrategyKind,
    ) -> Result<WorkflowResult<String>, EngineError> {
        if self.agents.is_empty() {
            return Err(EngineError::Configuration(
                "cannot execute with no agents in the session".to_string(),
            ));
        }
        let workflow = Workflow::new(self.agents.clone(), strategy_for(strategy))?;
        Ok(workflow.execute(task, &CancellationToken::new()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{
        CompletionOptions, CompletionResponse, Message, ProviderError,
    };
    use async_trait::async_trait;

    struct MockClient;

    #[async_trait]
    impl ClientWrapper for MockClient {
        async fn complete(
            &self,
            _messages: &[Message],
            _opts: Option<&CompletionOptions>,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: "ok".to_string(),
                tool_calls: vec![],
                usage: None,
                finish_reason: Some("stop".to_string()),
                model_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn duplicate_agent_ids_are_rejected() {
        let client = Arc::new(MockClient);
        let mut session = Session::new();
        session.add_agent(Agent::new("a1", "One", client.clone())).unwrap();
        let err = session.add_agent(Agent::new("a1", "Two", client)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn quick_execute_without_agents_is_a_config_error() {
        let session = Session::new();
        let err = session
            .quick_execute("task", StrategyKind::Majority)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn quick_execute_runs_a_majority_workflow() {
        let client = Arc::new(MockClient);
        let mut session = Session::new();
        session.register_client("mock", client.clone());
        session.add_agent(Agent::new("a1", "One", client.clone())).unwrap();
        session.add_agent(Agent::new("a2", "Two", client)).unwrap();

        let result = session
            .quick_execute("task", StrategyKind::Majority)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.value.as_deref(), Some("ok"));
        assert_eq!(result.agent_responses.len(), 2);
    }
}
