//! OpenAI-compatible chat-completions client.
//!
//! The [`OpenAIClient`] speaks the `/chat/completions` wire format directly over
//! the shared [`reqwest`] pool, which is also the dialect exposed by Anthropic's
//! and Google's compatibility endpoints — the [`anthropic`](super::anthropic) and
//! [`gemini`](super::gemini) wrappers delegate here with a different base URL.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::client_wrapper::{ClientWrapper, Message};
//! use quorum::clients::openai::OpenAIClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new(&key, "gpt-4o-mini");
//!     let reply = client.complete(&[Message::user("Hello")], None).await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, MessageChunk,
    MessageChunkStream, MessageStreamFuture, NativeToolCall, ProviderError, Role, TokenUsage,
    ToolDefinition,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Common OpenAI chat models (snapshot; any model string is accepted by [`OpenAIClient::new`]).
pub enum Model {
    /// `gpt-4o` – flagship multimodal tier.
    Gpt4o,
    /// `gpt-4o-mini` – fast, inexpensive tier.
    Gpt4oMini,
    /// `gpt-4.1` – long-context successor.
    Gpt41,
    /// `gpt-4.1-mini`
    Gpt41Mini,
    /// `o3-mini` – reasoning tier.
    O3Mini,
}

/// Convert a [`Model`] variant into its public string identifier.
fn model_to_string(model: Model) -> String {
    match model {
        Model::Gpt4o => "gpt-4o".to_string(),
        Model::Gpt4oMini => "gpt-4o-mini".to_string(),
        Model::Gpt41 => "gpt-4.1".to_string(),
        Model::Gpt41Mini => "gpt-4.1-mini".to_string(),
        Model::O3Mini => "o3-mini".to_string(),
    }
}

/// Client wrapper for any service exposing the OpenAI chat-completions surface.
pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a client from an API key and explicit model string.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    /// Create a client from an API key and strongly typed model variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new(secret_key, &model_to_string(model))
    }

    /// Create a client pointing at a custom OpenAI-compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            http: super::shared_http_client(),
            api_key: secret_key.to_string(),
            model: model_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Serialize the message list, injecting `opts.system_prompt` ahead of it.
    /// Further system messages inside `messages` (participant descriptions,
    /// context summaries) are preserved after it.
    fn wire_messages(messages: &[Message], opts: Option<&CompletionOptions>) -> Vec<Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = opts.and_then(|o| o.system_prompt.as_deref()) {
            wire.push(json!({"role": "system", "content": prompt}));
        }

        for msg in messages {
            let mut entry = match &msg.role {
                Role::System => json!({"role": "system", "content": msg.content}),
                Role::User => json!({"role": "user", "content": msg.content}),
                Role::Assistant => json!({"role": "assistant", "content": msg.content}),
                Role::Tool { call_id } => json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": msg.content,
                }),
            };
            if let Some(name) = &msg.name {
                entry["name"] = json!(name);
            }
            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                entry["tool_calls"] = json!(calls);
            }
            wire.push(entry);
        }
        wire
    }

    fn request_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        opts: Option<&CompletionOptions>,
        stream: bool,
    ) -> Value {
        let model = opts
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| self.model.clone());

        let mut body = json!({
            "model": model,
            "messages": Self::wire_messages(messages, opts),
        });

        if let Some(opts) = opts {
            if let Some(t) = opts.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(m) = opts.max_tokens {
                body["max_tokens"] = json!(m);
            }
            if let Some(p) = opts.top_p {
                body["top_p"] = json!(p);
            }
            if let Some(p) = opts.frequency_penalty {
                body["frequency_penalty"] = json!(p);
            }
            if let Some(p) = opts.presence_penalty {
                body["presence_penalty"] = json!(p);
            }
            if !opts.stop_sequences.is_empty() {
                body["stop"] = json!(opts.stop_sequences);
            }
            if let Some(fmt) = &opts.response_format {
                body["response_format"] = json!({"type": fmt});
            }
        }

        if let Some(tools) = tools {
            if !tools.is_empty() {
                let entries: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters_schema,
                            },
                        })
                    })
                    .collect();
                body["tools"] = json!(entries);
            }
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    async fn post_chat(&self, body: &Value) -> Result<ChatResponse, ProviderError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ProviderError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// The API transmits arguments as a JSON-encoded string.
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: Option<usize>,
}

impl ChatResponse {
    fn into_completion(self) -> Result<CompletionResponse, ProviderError> {
        let model_id = self.model;
        let usage = self.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
        });

        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response carried no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| NativeToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Null),
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
            finish_reason: choice.finish_reason,
            model_id,
        })
    }
}

/// Incremental SSE payload: `{"choices":[{"delta":{"content":"..."},"finish_reason":null}]}`.
#[derive(Deserialize)]
struct StreamPayload {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn complete(
        &self,
        messages: &[Message],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(messages, None, opts, false);
        self.post_chat(&body).await?.into_completion()
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(messages, Some(tools), opts, false);
        self.post_chat(&body).await?.into_completion()
    }

    fn stream<'a>(
        &'a self,
        messages: &'a [Message],
        opts: Option<&'a CompletionOptions>,
    ) -> MessageStreamFuture<'a> {
        Box::pin(async move {
            let body = self.request_body(messages, None, opts, true);
            let response = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http { status, body: text });
            }

            let bytes = response.bytes_stream();
            type SseState = (
                std::pin::Pin<
                    Box<dyn futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
                >,
                String,
                VecDeque<MessageChunk>,
                bool,
            );
            let state: SseState = (Box::pin(bytes), String::new(), VecDeque::new(), false);

            let stream = futures_util::stream::unfold(state, |mut state| async move {
                loop {
                    if let Some(chunk) = state.2.pop_front() {
                        return Some((Ok(chunk), state));
                    }
                    if state.3 {
                        return None;
                    }
                    match state.0.next().await {
                        None => {
                            state.3 = true;
                        }
                        Some(Err(e)) => {
                            state.3 = true;
                            return Some((Err(ProviderError::Transport(e.to_string())), state));
                        }
                        Some(Ok(bytes)) => {
                            state.1.push_str(&String::from_utf8_lossy(&bytes));
                            while let Some(pos) = state.1.find('\n') {
                                let line = state.1[..pos].trim().to_string();
                                state.1.drain(..=pos);
                                let Some(payload) = line.strip_prefix("data:") else {
                                    continue;
                                };
                                let payload = payload.trim();
                                if payload == "[DONE]" {
                                    state.3 = true;
                                    break;
                                }
                                if let Ok(parsed) =
                                    serde_json::from_str::<StreamPayload>(payload)
                                {
                                    if let Some(choice) = parsed.choices.into_iter().next() {
                                        state.2.push_back(MessageChunk {
                                            content: choice.delta.content.unwrap_or_default(),
                                            finish_reason: choice.finish_reason,
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            });

            Ok(Some(Box::pin(stream) as MessageChunkStream))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_injects_system_prompt_first() {
        let opts = CompletionOptions {
            system_prompt: Some("You are terse.".into()),
            ..Default::default()
        };
        let wire = OpenAIClient::wire_messages(&[Message::user("hi")], Some(&opts));
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "system");

        // Additional system messages in the list are preserved after it.
        let wire = OpenAIClient::wire_messages(
            &[Message::system("participants"), Message::user("hi")],
            Some(&opts),
        );
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0]["content"], "You are terse.");
        assert_eq!(wire[1]["content"], "participants");
    }

    #[test]
    fn tool_messages_carry_call_id() {
        let wire = OpenAIClient::wire_messages(&[Message::tool_result("call_9", "ok")], None);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_9");
    }

    #[test]
    fn response_parsing_maps_tool_calls_and_usage() {
        let raw = r#"{
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\": 1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let completion = parsed.into_completion().unwrap();
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "add");
        assert_eq!(completion.tool_calls[0].arguments["a"], 1);
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
        assert_eq!(completion.finish_reason.as_deref(), Some("tool_calls"));
    }
}
