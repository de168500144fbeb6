//! Shared primitives for provider-agnostic LLM clients.
//!
//! Applications interact with Quorum through the [`ClientWrapper`] trait and the
//! lightweight data types defined in this module.  The trait abstracts over concrete vendor
//! implementations while the supporting structs describe chat messages, completion options,
//! streaming chunks, and token accounting.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use quorum::client_wrapper::{ClientWrapper, Message, Role};
//! use quorum::clients::openai::OpenAIClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new(&key, "gpt-4o");
//!
//!     let response = client
//!         .complete(&[Message::user("Who are you?")], None)
//!         .await?;
//!
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming quick start
//!
//! ```rust,no_run
//! use quorum::client_wrapper::{ClientWrapper, Message};
//! use quorum::clients::openai::OpenAIClient;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new(&key, "gpt-4o-mini");
//!     let request = [Message::user("Explain Rust lifetimes in a sentence.")];
//!
//!     if let Some(mut chunks) = client.stream(&request, None).await? {
//!         while let Some(chunk) = chunks.next().await {
//!             print!("{}", chunk?.content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::fmt;
use std::pin::Pin;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request).
    User,
    /// An assistant authored message (model responses or developer supplied exemplars).
    Assistant,
    /// A tool-result message correlating with a prior assistant [`NativeToolCall`].
    ///
    /// Serialises as `{"role": "tool", "tool_call_id": "<call_id>", "content": "..."}` in the
    /// OpenAI wire format.
    Tool {
        /// Provider-assigned id of the originating tool call.
        call_id: String,
    },
}

/// A single tool call returned by the LLM in a native function-calling response.
///
/// Providers assign an opaque [`id`](NativeToolCall::id) to each call so that the
/// tool result can be correlated back in a follow-up [`Role::Tool`] message.
///
/// # Example
///
/// ```rust
/// use quorum::client_wrapper::NativeToolCall;
///
/// let tc = NativeToolCall {
///     id: "call_abc123".to_string(),
///     name: "calculator".to_string(),
///     arguments: serde_json::json!({"expression": "2 + 2"}),
/// };
/// assert_eq!(tc.name, "calculator");
/// ```
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
///
/// Serialised as an OpenAI-compatible `tools` array entry before transmission.
/// Handlers live on [`AgentTool`](crate::tool::AgentTool); this struct is the
/// wire-facing half only.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it will appear in the API `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to an LLM.
#[derive(Debug, Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.
    pub content: String,
    /// Optional participant name attached to the message (multi-agent transcripts).
    pub name: Option<String>,
    /// Native tool calls requested by the assistant.  Non-empty only on assistant
    /// messages returned by a provider responding with function-calling results.
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    /// Build a message with the given role and no name or tool calls.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
        }
    }

    /// Shorthand for a [`Role::System`] message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Shorthand for a [`Role::User`] message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Shorthand for a [`Role::Assistant`] message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Shorthand for a [`Role::Tool`] result message carrying the originating call id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            Role::Tool {
                call_id: call_id.into(),
            },
            content,
        )
    }

    /// Attach a participant name (builder pattern).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Per-request knobs forwarded to the provider.  Any `None` field falls back to
/// the provider default.
///
/// # Example
///
/// ```rust
/// use quorum::client_wrapper::CompletionOptions;
///
/// let opts = CompletionOptions {
///     temperature: Some(0.2),
///     max_tokens: Some(512),
///     ..Default::default()
/// };
/// assert_eq!(opts.temperature, Some(0.2));
/// assert!(opts.model.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Model override (e.g. `"gpt-4o"`).  Defaults to the client's configured model.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Hard cap on generated tokens.
    pub max_tokens: Option<usize>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,
    /// Frequency penalty.
    pub frequency_penalty: Option<f64>,
    /// Presence penalty.
    pub presence_penalty: Option<f64>,
    /// Sequences that stop generation when emitted.
    pub stop_sequences: Vec<String>,
    /// System prompt injected ahead of the message list when the list carries none.
    pub system_prompt: Option<String>,
    /// Provider-specific response format hint (e.g. `"json_object"`).
    pub response_format: Option<String>,
}

/// Uniform response shape produced by every [`ClientWrapper`] implementation.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Assistant text.  May be empty when the provider answered with tool calls only.
    pub content: String,
    /// Native tool calls selected by the model, if any.
    pub tool_calls: Vec<NativeToolCall>,
    /// Token accounting, when the provider reports it.
    pub usage: Option<TokenUsage>,
    /// Provider finish reason (e.g. `"stop"`, `"tool_calls"`).
    pub finish_reason: Option<String>,
    /// Identifier of the model that actually served the request.
    pub model_id: Option<String>,
}

/// Represents a chunk of content in a streaming response.
/// Each chunk contains a delta (incremental piece) of the assistant's response.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk.
    /// May be empty for chunks that don't contain content (e.g., finish_reason chunks).
    pub content: String,
    /// Optional finish reason mirroring the provider specific completion status (e.g. `"stop"`).
    pub finish_reason: Option<String>,
}

/// Type alias for a stream of message chunks compatible with `Send` executors.
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, ProviderError>> + Send>>;

/// Type alias for the future returned by [`ClientWrapper::stream`].
pub type MessageStreamFuture<'a> = Pin<
    Box<
        dyn std::future::Future<Output = Result<Option<MessageChunkStream>, ProviderError>>
            + Send
            + 'a,
    >,
>;

/// Broad HTTP status classification attached to [`ProviderError::Http`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 4xx — the request itself was rejected (auth, validation, rate limit).
    Client,
    /// 5xx — the provider failed.
    Server,
    /// Anything else the provider decided to return.
    Other,
}

impl StatusClass {
    /// Classify a raw HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => StatusClass::Client,
            500..=599 => StatusClass::Server,
            _ => StatusClass::Other,
        }
    }
}

/// Typed failure raised by a [`ClientWrapper`] implementation.
///
/// Carries enough context (status class plus response body) for callers to decide
/// between retrying, surfacing, or swallowing the failure.  Agents deliberately
/// swallow these into `Error: …` response text so a single flaky provider does
/// not abort a whole round — see [`Agent::process`](crate::agent::Agent::process).
#[derive(Debug)]
pub enum ProviderError {
    /// The provider answered with a non-success HTTP status.
    Http {
        /// Raw status code.
        status: u16,
        /// Response body as returned by the provider (often JSON with details).
        body: String,
    },
    /// The provider answered 2xx but the payload could not be interpreted.
    Malformed(String),
    /// The request never completed (DNS, TLS, connect, timeout at the socket level).
    Transport(String),
}

impl ProviderError {
    /// Status classification for [`ProviderError::Http`]; `None` for the other variants.
    pub fn status_class(&self) -> Option<StatusClass> {
        match self {
            ProviderError::Http { status, .. } => Some(StatusClass::from_status(*status)),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http { status, body } => {
                write!(f, "provider returned HTTP {}: {}", status, body)
            }
            ProviderError::Malformed(msg) => write!(f, "malformed provider response: {}", msg),
            ProviderError::Transport(msg) => write!(f, "provider transport failure: {}", msg),
        }
    }
}

impl Error for ProviderError {}

/// Trait-driven abstraction for a concrete LLM provider.
///
/// A [`ClientWrapper`] instance is responsible for translating Quorum requests into the
/// provider specific wire format and for returning provider responses in a uniform shape.
/// The abstraction deliberately excludes any conversation bookkeeping: transcripts are owned
/// by the [`deliberation`](crate::deliberation) and [`workflow`](crate::workflow) executors.
///
/// All implementations **must** be thread-safe (`Send + Sync`) so they can be shared between
/// async tasks; executors hold them behind `Arc<dyn ClientWrapper>` and never mutate them.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// The `messages` slice must include any system priming messages the caller wishes
    /// to send (or carry one in `opts.system_prompt`).  On success the returned
    /// [`CompletionResponse`] may contain non-empty
    /// [`tool_calls`](CompletionResponse::tool_calls) when the provider selected one
    /// or more tools on its own initiative.
    async fn complete(
        &self,
        messages: &[Message],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Chat completion with native function-calling tools attached.
    ///
    /// The default implementation ignores `tools` and falls through to
    /// [`complete`](ClientWrapper::complete); providers with a native tools API
    /// should override it.  When the model selects a tool, `content` may be empty
    /// and [`tool_calls`](CompletionResponse::tool_calls) populated.
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.complete(messages, opts).await
    }

    /// Request a streaming response from the provider.
    ///
    /// Implementors that sit in front of providers without streaming support can inherit
    /// the default implementation which simply resolves to `Ok(None)`.  A
    /// `Some(MessageChunkStream)` return value must yield [`MessageChunk`] instances that
    /// mirror the incremental tokens supplied by the upstream service.
    ///
    /// Returning a boxed future avoids imposing `Send` bounds on the internal async
    /// machinery of implementations built on SDKs that are not `Send` internally.
    fn stream<'a>(
        &'a self,
        _messages: &'a [Message],
        _opts: Option<&'a CompletionOptions>,
    ) -> MessageStreamFuture<'a> {
        Box::pin(async { Ok(None) })
    }

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4o"`).
    fn model_name(&self) -> &str;
}
