//! Anthropic Claude client wrapper built on the OpenAI-compatible transport.
//!
//! Use this module when you want to call Anthropic's Claude models through the same
//! [`ClientWrapper`] interface used by the rest of the crate.  The wrapper delegates
//! HTTP concerns to the shared OpenAI implementation, so swapping from OpenAI to
//! Claude only requires a different constructor.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::client_wrapper::{ClientWrapper, Message};
//! use quorum::clients::anthropic::{AnthropicClient, Model};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("ANTHROPIC_API_KEY")?;
//!     let client = AnthropicClient::new_with_model_enum(&key, Model::ClaudeSonnet4);
//!     let reply = client
//!         .complete(&[Message::user("List three Claude capabilities.")], None)
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, MessageStreamFuture,
    ProviderError, ToolDefinition,
};
use crate::clients::openai::OpenAIClient;
use async_trait::async_trait;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Client wrapper for Anthropic's Claude API routed through the OpenAI compatible surface.
pub struct AnthropicClient {
    /// Delegated client that handles the HTTP interactions.
    delegate: OpenAIClient,
    /// Exposed model name.
    model: String,
}

/// Anthropic Claude models available through the compatibility layer.
pub enum Model {
    /// `claude-opus-4-1` – flagship reasoning tier.
    ClaudeOpus41,
    /// `claude-opus-4-0` – previous Opus generation.
    ClaudeOpus4,
    /// `claude-sonnet-4-0` – balanced reasoning + throughput.
    ClaudeSonnet4,
    /// `claude-3-7-sonnet-latest` – latest 3.x Sonnet iteration.
    ClaudeSonnet37,
    /// `claude-3-5-haiku-latest` – fastest Claude tier.
    ClaudeHaiku35,
}

/// Convert a [`Model`] variant into its public string identifier.
fn model_to_string(model: Model) -> String {
    match model {
        Model::ClaudeOpus41 => "claude-opus-4-1".to_string(),
        Model::ClaudeOpus4 => "claude-opus-4-0".to_string(),
        Model::ClaudeSonnet4 => "claude-sonnet-4-0".to_string(),
        Model::ClaudeSonnet37 => "claude-3-7-sonnet-latest".to_string(),
        Model::ClaudeHaiku35 => "claude-3-5-haiku-latest".to_string(),
    }
}

impl AnthropicClient {
    /// Create a client from an API key and explicit model string.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, ANTHROPIC_BASE_URL)
    }

    /// Create a client from an API key and strongly typed model variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new(secret_key, &model_to_string(model))
    }

    /// Create a client pointing at a custom Claude-compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        AnthropicClient {
            // we reuse the OpenAI-compatible transport and delegate the calls to it
            delegate: OpenAIClient::new_with_base_url(secret_key, model_name, base_url),
            model: model_name.to_string(),
        }
    }
}

#[async_trait]
impl ClientWrapper for AnthropicClient {
    async fn complete(
        &self,
        messages: &[Message],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.delegate.complete(messages, opts).await
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.delegate.complete_with_tools(messages, tools, opts).await
    }

    fn stream<'a>(
        &'a self,
        messages: &'a [Message],
        opts: Option<&'a CompletionOptions>,
    ) -> MessageStreamFuture<'a> {
        self.delegate.stream(messages, opts)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
