use async_trait::async_trait;
use quorum::agent::{Agent, AgentResponse, SchemaHint, VoteBallot};
use quorum::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, NativeToolCall, ProviderError,
    Role, ToolDefinition,
};
use quorum::personality::{CommunicationStyle, Personality};
use quorum::tool::{AgentTool, ToolOutcome};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct MockClient {
    response: String,
}

impl MockClient {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
        })
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse {
            content: self.response.clone(),
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

struct FailingClient;

#[async_trait]
impl ClientWrapper for FailingClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::Http {
            status: 503,
            body: "overloaded".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// First call returns a tool call; the follow-up (which must carry the tool
/// result) returns the final answer.
struct ToolCallingClient {
    calls: Mutex<usize>,
}

#[async_trait]
impl ClientWrapper for ToolCallingClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        // The agent routes through complete_with_tools when tools are present.
        unreachable!("tool-capable path expected");
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");
        // The persona system prompt must lead the request.
        assert!(opts.and_then(|o| o.system_prompt.as_deref()).is_some());

        let mut calls = self.calls.lock().await;
        *calls += 1;
        if *calls == 1 {
            Ok(CompletionResponse {
                content: String::new(),
                tool_calls: vec![NativeToolCall {
                    id: "call_1".to_string(),
                    name: "add".to_string(),
                    arguments: json!({"a": 5, "b": 3}),
                }],
                usage: None,
                finish_reason: Some("tool_calls".to_string()),
                model_id: None,
            })
        } else {
            let last = messages.last().unwrap();
            assert_eq!(
                last.role,
                Role::Tool {
                    call_id: "call_1".to_string()
                }
            );
            assert_eq!(last.content, "8");
            Ok(CompletionResponse {
                content: "The sum is 8".to_string(),
                tool_calls: vec![],
                usage: None,
                finish_reason: Some("stop".to_string()),
                model_id: None,
            })
        }
    }

    fn model_name(&self) -> &str {
        "tool-mock"
    }
}

/// Always returns a tool call, driving the loop to its iteration cap.
struct LoopingToolClient;

#[async_trait]
impl ClientWrapper for LoopingToolClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        unreachable!("tool-capable path expected");
    }

    async fn complete_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse {
            content: String::new(),
            tool_calls: vec![NativeToolCall {
                id: "call_loop".to_string(),
                name: "add".to_string(),
                arguments: json!({"a": 1, "b": 1}),
            }],
            usage: None,
            finish_reason: Some("tool_calls".to_string()),
            model_id: None,
        })
    }

    fn model_name(&self) -> &str {
        "looping-mock"
    }
}

fn add_tool() -> AgentTool {
    AgentTool::new(
        "add",
        "Adds two numbers",
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        }),
    )
    .with_fn(|args| {
        let a = args["a"].as_f64().unwrap_or(0.0);
        let b = args["b"].as_f64().unwrap_or(0.0);
        ToolOutcome::success(format!("{}", a + b))
    })
}

fn candidate(agent_id: &str, content: &str) -> AgentResponse {
    AgentResponse {
        agent_id: agent_id.to_string(),
        agent_name: agent_id.to_string(),
        content: content.to_string(),
        structured: None,
        confidence: None,
        elapsed: Duration::ZERO,
        usage: None,
    }
}

#[tokio::test]
async fn provider_failures_become_error_responses() {
    let agent = Agent::new("a1", "Agent 1", Arc::new(FailingClient));
    let response = agent.process("task", &[], &CancellationToken::new()).await;

    assert!(response.is_error());
    assert!(response.content.starts_with("Error: "));
    assert!(response.content.contains("503"));
    assert_eq!(response.agent_id, "a1");
}

#[tokio::test]
async fn tool_loop_executes_and_feeds_back_results() {
    let agent = Agent::new(
        "calc",
        "Calculator",
        Arc::new(ToolCallingClient {
            calls: Mutex::new(0),
        }),
    )
    .with_tools(vec![add_tool()]);

    let response = agent
        .process("What is 5 + 3?", &[], &CancellationToken::new())
        .await;
    assert_eq!(response.content, "The sum is 8");
}

#[tokio::test]
async fn tool_loop_is_bounded() {
    let agent = Agent::new("looper", "Looper", Arc::new(LoopingToolClient))
        .with_tools(vec![add_tool()]);

    let response = agent.process("loop forever", &[], &CancellationToken::new()).await;
    assert_eq!(response.content, "Maximum tool iterations reached.");
}

#[tokio::test]
async fn structured_output_parses_embedded_json() {
    let agent = Agent::new(
        "judge",
        "Judge",
        MockClient::new(r#"Here you go: {"verdict": "approve", "confidence": 0.8} Done."#),
    );
    let schema = SchemaHint::new()
        .field("verdict", "string")
        .field("confidence", "number");

    let response = agent
        .process_structured("judge this", &schema, &[], &CancellationToken::new())
        .await;
    let structured = response.structured.unwrap();
    assert_eq!(structured["verdict"], "approve");
    assert_eq!(structured["confidence"], 0.8);
}

#[tokio::test]
async fn structured_parse_failure_is_non_fatal() {
    let agent = Agent::new("judge", "Judge", MockClient::new("no json at all"));
    let schema = SchemaHint::new().field("verdict", "string");

    let response = agent
        .process_structured("judge this", &schema, &[], &CancellationToken::new())
        .await;
    assert!(response.structured.is_none());
    assert_eq!(response.content, "no json at all");
}

#[tokio::test]
async fn vote_extracts_the_highest_in_range_number() {
    let agent = Agent::new(
        "voter",
        "Voter",
        MockClient::new("Candidate 1 is weak; candidate 3 is clearly best."),
    );
    let candidates = vec![
        candidate("a1", "first"),
        candidate("a2", "second"),
        candidate("a3", "third"),
    ];

    let response = agent
        .vote("pick one", &candidates, &CancellationToken::new())
        .await;
    let ballot: VoteBallot = response.parse_structured().unwrap();
    assert_eq!(ballot.chosen_agent_id, "a3");
}

#[tokio::test]
async fn vote_falls_back_to_the_first_candidate() {
    let agent = Agent::new("voter", "Voter", MockClient::new("they are all equally fine"));
    let candidates = vec![candidate("a1", "first"), candidate("a2", "second")];

    let response = agent
        .vote("pick one", &candidates, &CancellationToken::new())
        .await;
    let ballot: VoteBallot = response.parse_structured().unwrap();
    assert_eq!(ballot.chosen_agent_id, "a1");
}

#[tokio::test]
async fn elapsed_is_populated_even_on_failure() {
    let agent = Agent::new("a1", "Agent 1", Arc::new(FailingClient));
    let response = agent.process("task", &[], &CancellationToken::new()).await;
    // Duration::ZERO is a valid measurement; the point is the field is real.
    assert!(response.elapsed >= Duration::ZERO);
    assert!(response.usage.is_none());
}

#[test]
fn effective_system_prompt_carries_persona_details() {
    let personality = Personality::builder("Skeptic")
        .system_prompt("Challenge every claim.")
        .expertise("epistemology")
        .trait_hint("bias", "disconfirming evidence")
        .style(CommunicationStyle::Direct)
        .build();
    let agent = Agent::new("s1", "Skeptic", MockClient::new("x")).with_personality(personality);

    let prompt = agent.effective_system_prompt();
    assert!(prompt.starts_with("You are Skeptic."));
    assert!(prompt.contains("Challenge every claim."));
    assert!(prompt.contains("Your expertise: epistemology"));
    assert!(prompt.contains("bias: disconfirming evidence"));
    assert!(prompt.contains("Lead with your conclusion"));
}
