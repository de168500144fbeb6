// src/lib.rs

// The top-level `quorum` module carries the whole engine.
pub mod quorum;

// Re-export the module tree at the crate root so callers (and the rest of the
// crate) can use `quorum::voting::…` / `crate::voting::…` directly.
pub use quorum::{
    agent, builders, client_wrapper, clients, config, context, convergence, deliberation, error,
    event, personality, session, termination, tool, voting, workflow,
};

// Re-exporting key items for easier external access.
pub use quorum::agent::{Agent, AgentResponse};
pub use quorum::client_wrapper::{ClientWrapper, Message, Role};
pub use quorum::deliberation::{Deliberation, DeliberationMode};
pub use quorum::error::EngineError;
pub use quorum::session::Session;
pub use quorum::workflow::Workflow;
