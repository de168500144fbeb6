//! Agent System
//!
//! This module provides the core [`Agent`] struct: one LLM-backed participant with
//! an identity, a [`Personality`], an optional tool set, and default completion
//! options.  Agents are the fundamental building blocks of the crate and are used:
//!
//! - Standalone, for single-agent interactions
//! - Fanned out by the [`workflow`](crate::workflow) executor
//! - Scheduled in rounds by the [`deliberation`](crate::deliberation) executor
//!
//! # Operations
//!
//! - [`process`](Agent::process) — free-form generation with a bounded tool loop
//! - [`process_structured`](Agent::process_structured) — generation plus best-effort
//!   JSON extraction against a caller-supplied [`SchemaHint`]
//! - [`vote`](Agent::vote) — pick the best of several numbered candidate responses
//!
//! # Failure semantics
//!
//! Provider failures never escape an agent.  They surface as a successful
//! [`AgentResponse`] whose content begins with `Error: `, with the elapsed duration
//! populated.  Upstream voting strategies therefore always see N responses and a
//! single flaky provider cannot abort a round.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::agent::Agent;
//! use quorum::personality::Personality;
//! use quorum::clients::openai::OpenAIClient;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async {
//! let agent = Agent::new(
//!     "analyst",
//!     "Technical Analyst",
//!     Arc::new(OpenAIClient::new("key", "gpt-4o")),
//! )
//! .with_personality(Personality::analyst());
//!
//! let response = agent
//!     .process("How should we architect this system?", &[], &CancellationToken::new())
//!     .await;
//! println!("{}", response.content);
//! # };
//! ```

use crate::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, ProviderError, TokenUsage,
    ToolDefinition,
};
use crate::personality::Personality;
use crate::tool::{AgentTool, ToolOutcome};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Upper bound on tool round-trips within a single generation.
const MAX_TOOL_ITERATIONS: usize = 10;

/// Payload returned when the tool loop hits [`MAX_TOOL_ITERATIONS`].
const MAX_ITERATIONS_PAYLOAD: &str = "Maximum tool iterations reached.";

/// One agent's answer to one invocation.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Stable identifier of the responding agent.
    pub agent_id: String,
    /// Display name of the responding agent.
    pub agent_name: String,
    /// Final text produced across all tool iterations.
    pub content: String,
    /// Parsed structured output, when the invocation requested one and parsing succeeded.
    pub structured: Option<serde_json::Value>,
    /// Self-reported confidence in `[0, 1]`, when available.
    pub confidence: Option<f64>,
    /// Wall-clock duration of the invocation.  Populated even on failure.
    pub elapsed: Duration,
    /// Token accounting aggregated across all LLM calls of the invocation.
    pub usage: Option<TokenUsage>,
}

impl AgentResponse {
    /// Deserialize the structured output into a caller-declared shape.
    ///
    /// Returns `None` when no structured output was attached or it does not
    /// match `T`.
    pub fn parse_structured<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.structured
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Whether the content carries the agent-level failure marker.
    pub fn is_error(&self) -> bool {
        self.content.starts_with("Error: ")
    }
}

/// The ballot attached as structured output by [`Agent::vote`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteBallot {
    /// Agent id of the chosen candidate.
    pub chosen_agent_id: String,
    /// The voter's raw reply, kept as reasoning.
    pub reasoning: String,
}

/// Minimal schema descriptor rendered into the structured-output prompt hint.
///
/// No reflection and no global type registry: callers enumerate field names and
/// JSON types, the agent concatenates the rendered hint to the task and performs
/// substring JSON extraction on the reply.
///
/// # Example
///
/// ```rust
/// use quorum::agent::SchemaHint;
///
/// let hint = SchemaHint::new()
///     .field("verdict", "string")
///     .field("confidence", "number");
/// assert_eq!(hint.render(), r#"{"verdict": string, "confidence": number}"#);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaHint {
    fields: Vec<(String, String)>,
}

impl SchemaHint {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field with its JSON type name (`string`, `number`, `boolean`,
    /// `array of string`, …).
    pub fn field(mut self, name: impl Into<String>, json_type: impl Into<String>) -> Self {
        self.fields.push((name.into(), json_type.into()));
        self
    }

    /// Render the `{name: type, …}` hint embedded into the prompt.
    pub fn render(&self) -> String {
        let mut out = String::from("{");
        for (i, (name, ty)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "\"{}\": {}", name, ty);
        }
        out.push('}');
        out
    }
}

/// An LLM-backed participant: persona + provider + tools.
///
/// Agents are immutable once built and safely shared across concurrent
/// executions behind [`Arc`]; all state for an execution lives in the executor.
pub struct Agent {
    /// Stable identifier referenced by voting weights and transcripts.
    pub id: String,
    /// Human-readable display name for logging and prompts.
    pub name: String,
    /// The persona steering this agent's prompts and default temperature.
    pub personality: Personality,
    /// Tools available to this agent.  Names are unique within the set.
    pub tools: Vec<AgentTool>,
    /// Completion knobs applied to every invocation unless overridden.
    pub default_options: CompletionOptions,
    client: Arc<dyn ClientWrapper>,
}

impl Agent {
    /// Create an agent with the mandatory identity information and a neutral
    /// personality named after the agent.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
    ) -> Self {
        let name = name.into();
        let personality = Personality::builder(name.clone()).build();
        Self {
            id: id.into(),
            name,
            personality,
            tools: Vec::new(),
            default_options: CompletionOptions::default(),
            client,
        }
    }

    /// Attach a personality (builder pattern).
    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }

    /// Grant the agent a set of tools (builder pattern).  Tool names must be
    /// unique; duplicates are rejected by [`AgentBuilder`](crate::builders::AgentBuilder).
    pub fn with_tools(mut self, tools: Vec<AgentTool>) -> Self {
        self.tools = tools;
        self
    }

    /// Override the default completion options (builder pattern).
    pub fn with_default_options(mut self, options: CompletionOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Borrow the underlying provider client.
    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    /// Effective system prompt: the personality's base prompt augmented with
    /// expertise, trait hints, and the communication-style suffix.
    pub fn effective_system_prompt(&self) -> String {
        let p = &self.personality;
        let mut prompt = format!("You are {}.", self.name);
        if !p.system_prompt.is_empty() {
            prompt.push('\n');
            prompt.push_str(&p.system_prompt);
        }
        if let Some(expertise) = &p.expertise {
            let _ = write!(prompt, "\nYour expertise: {}", expertise);
        }
        if !p.traits.is_empty() {
            prompt.push_str("\nTraits:");
            for (key, value) in &p.traits {
                let _ = write!(prompt, "\n- {}: {}", key, value);
            }
        }
        let suffix = p.style.prompt_suffix();
        if !suffix.is_empty() {
            prompt.push('\n');
            prompt.push_str(suffix);
        }
        prompt
    }

    /// Completion options for one invocation: defaults, with the temperature
    /// falling back to the personality's creativity dial and the system prompt
    /// set to [`effective_system_prompt`](Agent::effective_system_prompt).
    fn derive_options(&self) -> CompletionOptions {
        let mut opts = self.default_options.clone();
        if opts.temperature.is_none() {
            opts.temperature = Some(self.personality.creativity);
        }
        opts.system_prompt = Some(self.effective_system_prompt());
        opts
    }

    /// Free-form generation.
    ///
    /// `context` (possibly empty) is prepended to the freshly built
    /// `[user(task)]` message.  When the agent carries tools, the tool-capable
    /// provider call is used and a bounded tool loop runs (at most
    /// [`MAX_TOOL_ITERATIONS`] round-trips).
    pub async fn process(
        &self,
        task: &str,
        context: &[Message],
        cancel: &CancellationToken,
    ) -> AgentResponse {
        let started = Instant::now();
        let mut messages: Vec<Message> = context.to_vec();
        messages.push(Message::user(task));

        let result = self.run_generation(messages, cancel).await;
        self.finish(result, started)
    }

    /// Structured generation.
    ///
    /// Appends a schema hint to the task, invokes the model, then extracts the
    /// substring between the first `{` and the last `}` and parses it as JSON.
    /// Parse failure is non-fatal: the text response is preserved and
    /// [`AgentResponse::structured`] stays `None`.
    pub async fn process_structured(
        &self,
        task: &str,
        schema: &SchemaHint,
        context: &[Message],
        cancel: &CancellationToken,
    ) -> AgentResponse {
        let hinted_task = format!(
            "{}\n\nRespond with a JSON object matching this schema: {}",
            task,
            schema.render()
        );
        let mut response = self.process(&hinted_task, context, cancel).await;
        if !response.is_error() {
            response.structured = extract_json(&response.content);
            if response.structured.is_none() {
                log::debug!(
                    "agent '{}': no parseable JSON in structured response",
                    self.id
                );
            }
        }
        response
    }

    /// Vote for the best of several candidate responses.
    ///
    /// Candidates are numbered starting at 1; the ballot is extracted by
    /// scanning the reply for the highest in-range number, falling through to
    /// the first candidate when no digit is found.  The resulting
    /// [`VoteBallot`] is attached as structured output.
    pub async fn vote(
        &self,
        task: &str,
        others: &[AgentResponse],
        cancel: &CancellationToken,
    ) -> AgentResponse {
        if others.is_empty() {
            return AgentResponse {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                content: "Error: no candidates to vote on".to_string(),
                structured: None,
                confidence: None,
                elapsed: Duration::ZERO,
                usage: None,
            };
        }

        let mut prompt = format!(
            "Task under discussion:\n{}\n\nCandidate responses:\n",
            task
        );
        for (i, candidate) in others.iter().enumerate() {
            let _ = write!(
                prompt,
                "{}. [{}]: {}\n\n",
                i + 1,
                candidate.agent_name,
                candidate.content
            );
        }
        prompt.push_str(
            "Which candidate best addresses the task? Reply with its number and a brief justification.",
        );

        let mut response = self.process(&prompt, &[], cancel).await;
        let choice = highest_in_range_number(&response.content, others.len()).unwrap_or(1);
        let ballot = VoteBallot {
            chosen_agent_id: others[choice - 1].agent_id.clone(),
            reasoning: response.content.clone(),
        };
        response.structured = serde_json::to_value(&ballot).ok();
        response
    }

    /// The generation core shared by all operations: invoke the provider,
    /// execute tool calls, repeat until the model stops asking for tools.
    async fn run_generation(
        &self,
        mut messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<(String, Option<TokenUsage>), ProviderError> {
        let opts = self.derive_options();
        let tool_definitions: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|t| t.definition.clone())
            .collect();

        let mut total_usage: Option<TokenUsage> = None;

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let response = self.invoke(&messages, &tool_definitions, &opts, cancel).await?;
            accumulate_usage(&mut total_usage, response.usage.clone());

            if response.tool_calls.is_empty() {
                return Ok((response.content, total_usage));
            }

            log::debug!(
                "agent '{}': {} tool call(s) on iteration {}",
                self.id,
                response.tool_calls.len(),
                iteration
            );

            // Echo the assistant turn (with its tool calls) so the follow-up
            // request is well-formed, then answer every call.
            let mut assistant_echo = Message::assistant(response.content.clone());
            assistant_echo.tool_calls = response.tool_calls.clone();
            messages.push(assistant_echo);

            for call in &response.tool_calls {
                let outcome = self.execute_tool(call.name.as_str(), call.arguments.clone(), cancel).await;
                messages.push(Message::tool_result(
                    call.id.clone(),
                    outcome.into_message_text(&call.name),
                ));
            }
        }

        log::warn!(
            "agent '{}': tool loop exhausted after {} iterations",
            self.id,
            MAX_TOOL_ITERATIONS
        );
        Ok((MAX_ITERATIONS_PAYLOAD.to_string(), total_usage))
    }

    /// One provider round-trip, cancellation-aware, routed through the
    /// tool-capable call when the agent has tools.
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        let call = async {
            if tools.is_empty() {
                self.client.complete(messages, Some(opts)).await
            } else {
                self.client.complete_with_tools(messages, tools, Some(opts)).await
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Transport("request cancelled".into())),
            result = call => result,
        }
    }

    /// Run one tool call.  Unknown tools and tools without handlers produce
    /// failure outcomes routed back to the model, never errors.
    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.iter().find(|t| t.definition.name == name) else {
            return ToolOutcome::failure(format!("unknown tool '{}'", name));
        };
        let Some(handler) = &tool.handler else {
            return ToolOutcome::failure(format!("tool '{}' has no handler", name));
        };
        handler.execute(args, cancel).await
    }

    /// Wrap the generation outcome into the uniform response shape, converting
    /// provider failures into `Error: …` text.
    fn finish(
        &self,
        result: Result<(String, Option<TokenUsage>), ProviderError>,
        started: Instant,
    ) -> AgentResponse {
        let (content, usage) = match result {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("agent '{}' provider failure: {}", self.id, err);
                (format!("Error: {}", err), None)
            }
        };
        AgentResponse {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            content,
            structured: None,
            confidence: None,
            elapsed: started.elapsed(),
            usage,
        }
    }
}

/// Accumulate token usage across the calls of one generation.
fn accumulate_usage(total: &mut Option<TokenUsage>, delta: Option<TokenUsage>) {
    if let Some(delta) = delta {
        let entry = total.get_or_insert_with(TokenUsage::default);
        entry.input_tokens += delta.input_tokens;
        entry.output_tokens += delta.output_tokens;
        entry.total_tokens += delta.total_tokens;
    }
}

/// Best-effort JSON extraction: the substring from the first `{` to the last `}`.
pub(crate) fn extract_json(content: &str) -> Option<serde_json::Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

/// Highest number in `1..=max` appearing as a digit run in `content`.
fn highest_in_range_number(content: &str, max: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut current = String::new();
    for ch in content.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse::<usize>() {
                if (1..=max).contains(&n) && best.map_or(true, |b| n > b) {
                    best = Some(n);
                }
            }
            current.clear();
        }
    }
    best
}
