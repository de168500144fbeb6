//! Tools an agent can call during generation.
//!
//! An [`AgentTool`] pairs the wire-facing
//! [`ToolDefinition`](crate::client_wrapper::ToolDefinition) with an optional
//! [`ToolHandler`] executed by the agent's tool loop.  Handlers are opaque
//! callbacks: they may suspend, must be cancellation-aware, and report their
//! outcome through [`ToolOutcome`] — a failed handler becomes a tool-role
//! message seen by the next model call, never an error propagated upward.
//!
//! # Example
//!
//! ```rust
//! use quorum::tool::{AgentTool, ToolOutcome};
//! use serde_json::json;
//!
//! let tool = AgentTool::new(
//!     "add",
//!     "Adds two numbers",
//!     json!({
//!         "type": "object",
//!         "properties": {
//!             "a": {"type": "number"},
//!             "b": {"type": "number"}
//!         },
//!         "required": ["a", "b"]
//!     }),
//! )
//! .with_fn(|args| {
//!     let a = args["a"].as_f64().unwrap_or(0.0);
//!     let b = args["b"].as_f64().unwrap_or(0.0);
//!     ToolOutcome::success(format!("{}", a + b))
//! });
//!
//! assert_eq!(tool.definition.name, "add");
//! assert!(tool.handler.is_some());
//! ```

use crate::client_wrapper::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of executing a tool handler.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Whether the handler completed its work.
    pub success: bool,
    /// Output text forwarded to the model in the tool-result message.
    pub output: String,
    /// Error description when `success` is false.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Successful outcome carrying the given output text.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Failed outcome carrying an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Render the outcome as the text body of the tool-result message.
    pub fn into_message_text(self, tool_name: &str) -> String {
        if self.success {
            self.output
        } else {
            format!(
                "Tool '{}' failed: {}",
                tool_name,
                self.error.unwrap_or_else(|| "unknown error".to_string())
            )
        }
    }
}

/// Asynchronous callback backing an [`AgentTool`].
///
/// Implementations must observe `cancel` at their own suspension points; the
/// agent does not forcibly abort a running handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the JSON arguments supplied by the model.
    async fn execute(&self, args: Value, cancel: &CancellationToken) -> ToolOutcome;
}

/// Adapter turning a plain synchronous closure into a [`ToolHandler`].
struct FnToolHandler<F>
where
    F: Fn(Value) -> ToolOutcome + Send + Sync,
{
    f: F,
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value) -> ToolOutcome + Send + Sync,
{
    async fn execute(&self, args: Value, _cancel: &CancellationToken) -> ToolOutcome {
        (self.f)(args)
    }
}

/// A named tool attached to one agent.
///
/// Tool names must be unique within an agent's tool set; the
/// [`AgentBuilder`](crate::builders::AgentBuilder) enforces this at build time.
#[derive(Clone)]
pub struct AgentTool {
    /// Wire-facing schema forwarded to the provider.
    pub definition: ToolDefinition,
    /// Callback invoked when the model selects this tool.  A tool without a
    /// handler still advertises its schema; the agent answers such calls with
    /// a failure outcome.
    pub handler: Option<Arc<dyn ToolHandler>>,
}

impl AgentTool {
    /// Declare a tool from its name, description, and JSON-schema parameters.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters_schema,
            },
            handler: None,
        }
    }

    /// Attach an asynchronous handler (builder pattern).
    pub fn with_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Attach a synchronous closure as the handler (builder pattern).
    pub fn with_fn<F>(self, f: F) -> Self
    where
        F: Fn(Value) -> ToolOutcome + Send + Sync + 'static,
    {
        self.with_handler(Arc::new(FnToolHandler { f }))
    }
}
