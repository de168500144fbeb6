//! Engine-level error types.
//!
//! Provider failures are swallowed inside agents (see
//! [`Agent::process`](crate::agent::Agent::process)); everything that escapes to a
//! caller travels as an [`EngineError`].  Configuration errors are raised
//! synchronously at build/execute entry and are never converted into result
//! failures.

use crate::client_wrapper::ProviderError;
use std::error::Error;
use std::fmt;

/// Errors surfaced by executors, strategies, and builders.
#[derive(Debug)]
pub enum EngineError {
    /// Structural misconfiguration (e.g. building a workflow with no agents,
    /// referencing an unknown provider in a config file).
    Configuration(String),
    /// A runtime failure while coordinating agents (join errors, missing
    /// transcript invariants, strategy preconditions).
    Execution(String),
    /// A provider failure that escaped a context where it could not be
    /// swallowed (e.g. an arbiter call inside a voting strategy).
    Provider(ProviderError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            EngineError::Execution(msg) => write!(f, "execution failed: {}", msg),
            EngineError::Provider(err) => write!(f, "provider error: {}", err),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Provider(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        EngineError::Provider(err)
    }
}
