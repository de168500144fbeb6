// src/quorum/mod.rs

pub mod agent;
pub mod builders;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod context;
pub mod convergence;
pub mod deliberation;
pub mod error;
pub mod event;
pub mod personality;
pub mod session;
pub mod termination;
pub mod tool;
pub mod voting;
pub mod workflow;

// Re-export the types most applications touch so they can be reached as
// quorum::Agent instead of quorum::quorum::agent::Agent.
pub use agent::{Agent, AgentResponse};
pub use client_wrapper::{ClientWrapper, Message, Role};
pub use deliberation::{Deliberation, DeliberationMode};
pub use error::EngineError;
pub use session::Session;
pub use workflow::Workflow;
