use async_trait::async_trait;
use quorum::agent::Agent;
use quorum::builders::WorkflowBuilder;
use quorum::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, ProviderError, TokenUsage,
};
use quorum::error::EngineError;
use quorum::event::{ProgressHandler, WorkflowProgress, WorkflowStage};
use quorum::voting::{MajorityVoting, StrategyKind, VotingContext};
use quorum::workflow::{Workflow, WorkflowOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct MockClient {
    name: String,
    response: String,
    delay: Option<Duration>,
}

impl MockClient {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            name: "mock".to_string(),
            response: response.to_string(),
            delay: None,
        })
    }

    fn slow(response: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: "slow-mock".to_string(),
            response: response.to_string(),
            delay: Some(delay),
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
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(CompletionResponse {
            content: self.response.clone(),
            tool_calls: vec![],
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            }),
            finish_reason: Some("stop".to_string()),
            model_id: None,
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

struct StageRecorder {
    stages: Mutex<Vec<WorkflowStage>>,
}

#[async_trait]
impl ProgressHandler for StageRecorder {
    async fn on_workflow_progress(&self, progress: &WorkflowProgress) {
        self.stages.lock().await.push(progress.stage);
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn parallel_fan_out_gathers_every_agent() {
    init_logging();
    let workflow = Workflow::new(
        vec![
            Arc::new(Agent::new("a1", "Agent 1", MockClient::new("yes"))),
            Arc::new(Agent::new("a2", "Agent 2", MockClient::new("yes"))),
            Arc::new(Agent::new("a3", "Agent 3", MockClient::new("no"))),
        ],
        Arc::new(MajorityVoting),
    )
    .unwrap();

    let result = workflow.execute("go?", &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(result.agent_responses.len(), 3);
    assert_eq!(result.value.as_deref(), Some("yes"));
    let voting = result.voting_result.unwrap();
    assert!((voting.consensus_score - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn sequential_execution_preserves_registration_order() {
    let workflow = Workflow::new(
        vec![
            Arc::new(Agent::new("first", "First", MockClient::new("one"))),
            Arc::new(Agent::new("second", "Second", MockClient::new("two"))),
        ],
        Arc::new(MajorityVoting),
    )
    .unwrap()
    .with_options(WorkflowOptions {
        enable_parallel_execution: false,
        ..Default::default()
    });

    let result = workflow.execute("task", &CancellationToken::new()).await;
    assert!(result.success);
    let ids: Vec<&str> = result
        .agent_responses
        .iter()
        .map(|r| r.agent_id.as_str())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
}

#[tokio::test]
async fn building_with_no_agents_is_a_config_error() {
    let err = Workflow::new(vec![], Arc::new(MajorityVoting)).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));

    let err = WorkflowBuilder::new().voting(StrategyKind::Majority).build().unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

#[tokio::test]
async fn timeout_surfaces_as_a_distinct_failure() {
    let workflow = Workflow::new(
        vec![Arc::new(Agent::new(
            "slow",
            "Slow Agent",
            MockClient::slow("late", Duration::from_secs(5)),
        ))],
        Arc::new(MajorityVoting),
    )
    .unwrap()
    .with_options(WorkflowOptions {
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    });

    let result = workflow.execute("task", &CancellationToken::new()).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("timed out"), "unexpected error: {}", error);
}

#[tokio::test]
async fn cancellation_beats_the_deadline_label() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let workflow = Workflow::new(
        vec![Arc::new(Agent::new(
            "slow",
            "Slow Agent",
            MockClient::slow("late", Duration::from_secs(5)),
        ))],
        Arc::new(MajorityVoting),
    )
    .unwrap()
    .with_options(WorkflowOptions {
        timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    });

    let result = workflow.execute("task", &cancel).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Workflow was cancelled"));
}

#[tokio::test]
async fn consensus_retry_runs_when_threshold_missed() {
    // Three distinct answers: majority consensus is 1/3, below the required
    // threshold, so the consensus strategy re-runs (and, with no arbiter,
    // falls back to the first response).
    let workflow = Workflow::new(
        vec![
            Arc::new(Agent::new("a1", "Agent 1", MockClient::new("alpha"))),
            Arc::new(Agent::new("a2", "Agent 2", MockClient::new("beta"))),
            Arc::new(Agent::new("a3", "Agent 3", MockClient::new("gamma"))),
        ],
        Arc::new(MajorityVoting),
    )
    .unwrap()
    .with_options(WorkflowOptions {
        require_consensus: true,
        minimum_consensus_score: 0.6,
        ..Default::default()
    });

    let recorder = Arc::new(StageRecorder {
        stages: Mutex::new(Vec::new()),
    });
    let workflow = workflow.with_progress_handler(recorder.clone());

    let result = workflow.execute("task", &CancellationToken::new()).await;
    assert!(result.success);
    let voting = result.voting_result.unwrap();
    assert_eq!(voting.strategy, StrategyKind::Consensus);

    let stages = recorder.stages.lock().await;
    assert!(stages.contains(&WorkflowStage::ConsensusBuilding));
    assert!(stages.contains(&WorkflowStage::Completed));
}

#[tokio::test]
async fn progress_counter_reaches_total() {
    struct CounterRecorder {
        max_completed: Mutex<usize>,
    }

    #[async_trait]
    impl ProgressHandler for CounterRecorder {
        async fn on_workflow_progress(&self, progress: &WorkflowProgress) {
            let mut max = self.max_completed.lock().await;
            *max = (*max).max(progress.completed_agents);
        }
    }

    let recorder = Arc::new(CounterRecorder {
        max_completed: Mutex::new(0),
    });
    let workflow = Workflow::new(
        vec![
            Arc::new(Agent::new("a1", "Agent 1", MockClient::new("x"))),
            Arc::new(Agent::new("a2", "Agent 2", MockClient::new("x"))),
            Arc::new(Agent::new("a3", "Agent 3", MockClient::new("x"))),
        ],
        Arc::new(MajorityVoting),
    )
    .unwrap()
    .with_progress_handler(recorder.clone());

    let result = workflow.execute("task", &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(*recorder.max_completed.lock().await, 3);
}

#[tokio::test]
async fn structured_execution_extracts_typed_output() {
    use quorum::agent::SchemaHint;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Verdict {
        verdict: String,
        score: f64,
    }

    let workflow = Workflow::new(
        vec![Arc::new(Agent::new(
            "judge",
            "Judge",
            MockClient::new(r#"Sure: {"verdict": "ship", "score": 0.9}"#),
        ))],
        Arc::new(MajorityVoting),
    )
    .unwrap();

    let schema = SchemaHint::new().field("verdict", "string").field("score", "number");
    let result = workflow
        .execute_structured::<Verdict>("ship it?", &schema, &CancellationToken::new())
        .await;

    assert!(result.success);
    let verdict = result.value.unwrap();
    assert_eq!(verdict.verdict, "ship");
    assert!((verdict.score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn voting_context_weights_flow_through() {
    let workflow = Workflow::new(
        vec![
            Arc::new(Agent::new("expert", "Expert", MockClient::new("A"))),
            Arc::new(Agent::new("n1", "Novice 1", MockClient::new("B"))),
            Arc::new(Agent::new("n2", "Novice 2", MockClient::new("B"))),
        ],
        Arc::new(quorum::voting::WeightedVoting::new()),
    )
    .unwrap()
    .with_voting_context(VotingContext::new().with_weight("expert", 5.0));

    let result = workflow.execute("task", &CancellationToken::new()).await;
    assert_eq!(result.value.as_deref(), Some("A"));
}
