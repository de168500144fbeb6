//! Google Gemini client wrapper built on the OpenAI-compatible transport.
//!
//! Connects to Google's Generative Language API through its OpenAI compatibility
//! endpoint using the same message structures and token accounting abstractions
//! employed by the rest of the crate.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::client_wrapper::{ClientWrapper, Message};
//! use quorum::clients::gemini::{GeminiClient, Model};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("GEMINI_API_KEY")?;
//!     let client = GeminiClient::new_with_model_enum(&key, Model::Gemini25Flash);
//!     let reply = client
//!         .complete(&[Message::user("What industries benefit most from Gemini?")], None)
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

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Client wrapper for Google Gemini routed through the OpenAI compatible surface.
pub struct GeminiClient {
    delegate: OpenAIClient,
    model: String,
}

/// Gemini model identifiers (snapshot; any model string is accepted by [`GeminiClient::new`]).
pub enum Model {
    /// `gemini-2.5-pro` – strongest reasoning tier.
    Gemini25Pro,
    /// `gemini-2.5-flash` – balanced price/latency tier.
    Gemini25Flash,
    /// `gemini-2.0-flash`
    Gemini20Flash,
    /// `gemini-2.0-flash-lite`
    Gemini20FlashLite,
}

/// Convert a strongly typed [`Model`] into the string literal expected by the endpoint.
fn model_to_string(model: Model) -> String {
    match model {
        Model::Gemini25Pro => "gemini-2.5-pro".to_string(),
        Model::Gemini25Flash => "gemini-2.5-flash".to_string(),
        Model::Gemini20Flash => "gemini-2.0-flash".to_string(),
        Model::Gemini20FlashLite => "gemini-2.0-flash-lite".to_string(),
    }
}

impl GeminiClient {
    /// Create a client from an API key and explicit model string.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, GEMINI_BASE_URL)
    }

    /// Create a client from an API key and strongly typed model variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new(secret_key, &model_to_string(model))
    }

    /// Create a client pointing at a custom Gemini-compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        GeminiClient {
            delegate: OpenAIClient::new_with_base_url(secret_key, model_name, base_url),
            model: model_name.to_string(),
        }
    }
}

#[async_trait]
impl ClientWrapper for GeminiClient {
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
