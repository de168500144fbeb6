use async_trait::async_trait;
use quorum::agent::Agent;
use quorum::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, ProviderError,
};
use quorum::deliberation::{Deliberation, DeliberationMode};
use quorum::error::EngineError;
use quorum::termination::{
    AgentTerminator, CompositeTermination, CustomTermination, MaxRounds, MaxTokens,
    TerminationDecision, TerminationReason, TerminationStrategy,
};
use quorum::voting::MajorityVoting;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct ConstantClient {
    response: String,
}

impl ConstantClient {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
        })
    }
}

#[async_trait]
impl ClientWrapper for ConstantClient {
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
        "constant"
    }
}

/// Strategy that counts how often it is checked, to observe short-circuiting.
struct CountingStrategy {
    checks: Arc<AtomicUsize>,
    fire: bool,
}

#[async_trait]
impl TerminationStrategy for CountingStrategy {
    async fn check(
        &self,
        _state: &quorum::deliberation::DeliberationState,
        _cancel: &CancellationToken,
    ) -> Result<TerminationDecision, EngineError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.fire {
            Ok(TerminationDecision::terminate(
                TerminationReason::CustomCondition,
                "counting strategy fired",
            ))
        } else {
            Ok(TerminationDecision::proceed(
                TerminationReason::CustomCondition,
                "counting strategy holding",
            ))
        }
    }

    fn name(&self) -> &str {
        "CountingStrategy"
    }
}

async fn run_one_round_deliberation(
    termination: Arc<dyn TerminationStrategy>,
) -> quorum::deliberation::DeliberationResult<String> {
    let deliberation = Deliberation::new(
        vec![Arc::new(Agent::new("a1", "Agent 1", ConstantClient::new("ok")))],
        Arc::new(MajorityVoting),
        termination,
    )
    .unwrap()
    .with_mode(DeliberationMode::RoundRobin);
    deliberation.execute("task", &CancellationToken::new()).await
}

#[tokio::test]
async fn any_mode_short_circuits_on_the_first_firing_child() {
    let early_checks = Arc::new(AtomicUsize::new(0));
    let late_checks = Arc::new(AtomicUsize::new(0));

    let composite = CompositeTermination::any()
        .with(CountingStrategy {
            checks: early_checks.clone(),
            fire: true,
        })
        .with(CountingStrategy {
            checks: late_checks.clone(),
            fire: true,
        });

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    // The first child fires on the very first check; the second child must
    // never be consulted.
    assert!(early_checks.load(Ordering::SeqCst) >= 1);
    assert_eq!(late_checks.load(Ordering::SeqCst), 0);
    assert_eq!(result.total_rounds, 0);
}

#[tokio::test]
async fn all_mode_holds_until_every_child_fires() {
    use quorum::deliberation::DeliberationState;

    let composite = CompositeTermination::all()
        .with(MaxRounds::new(2))
        .with(MaxTokens::new(1_000_000));

    // Round bound satisfied, token bound not: the composite must not fire.
    let mut state = DeliberationState::new("task", vec!["a1".to_string()]);
    state.current_round = 5;
    let decision = composite
        .check(&state, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!decision.should_terminate);

    // Both satisfied: it fires with a synthesized explanation.
    state.total_tokens_used = 2_000_000;
    let decision = composite
        .check(&state, &CancellationToken::new())
        .await
        .unwrap();
    assert!(decision.should_terminate);
    assert_eq!(decision.reason, TerminationReason::AllStrategies);
    assert!(decision.explanation.contains("MaxRounds"));
    assert!(decision.explanation.contains("MaxTokens"));
}

#[tokio::test]
async fn all_mode_fires_with_a_synthesized_reason() {
    let composite = CompositeTermination::all()
        .with(MaxRounds::new(2))
        .with(CustomTermination::new("always ready", |_| true));

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.total_rounds, 2);
    assert_eq!(result.termination_reason, TerminationReason::AllStrategies);
}

#[tokio::test]
async fn custom_sync_predicate_terminates() {
    let composite = CompositeTermination::any()
        .with(CustomTermination::new("two messages seen", |state| {
            state.transcript.len() >= 2
        }))
        .with(MaxRounds::new(50));

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.termination_reason, TerminationReason::CustomCondition);
    assert_eq!(result.total_rounds, 2);
}

#[tokio::test]
async fn custom_async_predicate_terminates() {
    use futures_util::future::BoxFuture;
    use quorum::deliberation::DeliberationState;

    let composite = CompositeTermination::any()
        .with(CustomTermination::new_async(
            "async check",
            |state: &DeliberationState| -> BoxFuture<'_, bool> {
                Box::pin(async move { state.current_round >= 1 })
            },
        ))
        .with(MaxRounds::new(50));

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.total_rounds, 1);
}

#[tokio::test]
async fn agent_judge_terminates_on_confident_verdict() {
    let judge = Arc::new(Agent::new(
        "judge",
        "Judge",
        ConstantClient::new(
            r#"{"should_terminate": true, "confidence": 0.9,
                "reasoning": "positions have settled",
                "key_points_resolved": ["scope"], "outstanding_issues": []}"#,
        ),
    ));

    let composite = CompositeTermination::any()
        .with(MaxRounds::new(50))
        .with(AgentTerminator::new(judge));

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.termination_reason, TerminationReason::AgentDecision);
    // The judge fires at the very first check, before any round runs.
    assert_eq!(result.total_rounds, 0);
}

#[tokio::test]
async fn agent_judge_below_threshold_does_not_terminate() {
    let judge = Arc::new(Agent::new(
        "judge",
        "Judge",
        ConstantClient::new(
            r#"{"should_terminate": true, "confidence": 0.4, "reasoning": "unsure"}"#,
        ),
    ));

    let composite = CompositeTermination::any()
        .with(AgentTerminator::new(judge))
        .with(MaxRounds::new(2));

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.termination_reason, TerminationReason::MaxRoundsReached);
    assert_eq!(result.total_rounds, 2);
}

#[tokio::test]
async fn unparseable_judge_verdicts_are_ignored() {
    let judge = Arc::new(Agent::new(
        "judge",
        "Judge",
        ConstantClient::new("I cannot decide right now."),
    ));

    let composite = CompositeTermination::any()
        .with(AgentTerminator::new(judge))
        .with(MaxRounds::new(1));

    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.termination_reason, TerminationReason::MaxRoundsReached);
}

#[tokio::test]
async fn empty_composite_never_terminates_but_bounds_protect() {
    // An empty Any-composite alone would loop forever; pair it with MaxRounds
    // in a fresh composite to show the non-firing path is exercised.
    let composite = CompositeTermination::any().with(MaxRounds::new(1));
    let result = run_one_round_deliberation(Arc::new(composite)).await;
    assert!(result.success);
    assert_eq!(result.total_rounds, 1);
}
