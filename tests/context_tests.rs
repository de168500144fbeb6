use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use quorum::client_wrapper::{
    ClientWrapper, CompletionOptions, CompletionResponse, Message, ProviderError,
};
use quorum::context::{
    ContextManager, HierarchicalManager, MaskingConfig, MaskingStrategy,
    ObservationMaskingManager, PhaseNaming, RecursiveSummarizingManager, SlidingWindowManager,
};
use quorum::deliberation::DeliberationMessage;
use std::sync::Arc;

struct SummarizerMock;

#[async_trait]
impl ClientWrapper for SummarizerMock {
    async fn complete(
        &self,
        messages: &[Message],
        _opts: Option<&CompletionOptions>,
    ) -> Result<CompletionResponse, ProviderError> {
        // Reply with a stable marker plus a hint of what was summarised.
        let first_line = messages
            .first()
            .map(|m| m.content.lines().next().unwrap_or("").to_string())
            .unwrap_or_default();
        Ok(CompletionResponse {
            content: format!("condensed({})", first_line.chars().take(40).collect::<String>()),
            tool_calls: vec![],
            usage: None,
            finish_reason: Some("stop".to_string()),
            model_id: None,
        })
    }

    fn model_name(&self) -> &str {
        "summarizer-mock"
    }
}

/// `rounds` rounds with `agents` speakers each, deterministic timestamps.
fn transcript(rounds: u32, agents: usize) -> Vec<DeliberationMessage> {
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    let mut messages = Vec::new();
    let mut tick = 0i64;
    for round in 1..=rounds {
        for agent in 0..agents {
            tick += 1;
            messages.push(DeliberationMessage {
                agent_id: format!("a{}", agent + 1),
                agent_name: format!("Agent {}", agent + 1),
                content: format!("round {} statement from agent {}", round, agent + 1),
                round,
                timestamp: base + ChronoDuration::seconds(tick),
                in_response_to: None,
                token_count: 0,
            });
        }
    }
    messages
}

#[tokio::test]
async fn sliding_window_projects_anchor_rounds() {
    // Rounds 1..5 with 2 agents per round, message budget of 6: the projection
    // must carry all of round 1 and rounds 4–5, ascending, with a compression
    // ratio of 1 − 6/10.
    let transcript = transcript(5, 2);
    let manager = SlidingWindowManager::new().with_max_messages(6);

    let window = manager.project(&transcript, "a1").await.unwrap();

    assert_eq!(window.messages.len(), 6);
    let rounds: Vec<u32> = window.messages.iter().map(|m| m.round).collect();
    assert_eq!(rounds, vec![1, 1, 4, 4, 5, 5]);
    for pair in window.messages.windows(2) {
        assert!((pair[0].round, pair[0].timestamp) <= (pair[1].round, pair[1].timestamp));
    }
    assert!((window.compression_ratio() - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn sliding_window_projection_is_idempotent() {
    let transcript = transcript(7, 3);
    let manager = SlidingWindowManager::new()
        .with_max_messages(9)
        .with_max_tokens(200);

    let once = manager.project(&transcript, "a1").await.unwrap();
    let twice = manager.project(&once.messages, "a1").await.unwrap();

    assert_eq!(once.messages.len(), twice.messages.len());
    assert_eq!(once.estimated_tokens, twice.estimated_tokens);
    for (a, b) in once.messages.iter().zip(&twice.messages) {
        assert_eq!((a.agent_id.as_str(), a.round), (b.agent_id.as_str(), b.round));
    }
}

#[tokio::test]
async fn recursive_summarization_preserves_recent_rounds() {
    let transcript = transcript(6, 2);
    let manager = RecursiveSummarizingManager::new(Arc::new(SummarizerMock))
        .with_preserve_recent_rounds(2)
        .with_chunk_size(2);

    let window = manager.project(&transcript, "a1").await.unwrap();

    // Rounds 5 and 6 verbatim, everything older folded into the summary.
    assert_eq!(window.stats.rounds_preserved, vec![5, 6]);
    assert_eq!(window.messages.len(), 4);
    let summary = window.summary.unwrap();
    assert!(summary.starts_with("condensed("), "summary: {}", summary);
    assert_eq!(window.stats.summarized, 8);
    assert!(window.retained_count <= window.original_count);
}

#[tokio::test]
async fn recursive_summaries_reuse_the_cache() {
    let transcript_a = transcript(6, 2);
    let manager = RecursiveSummarizingManager::new(Arc::new(SummarizerMock));

    let first = manager.project(&transcript_a, "a1").await.unwrap();
    // A second projection over a longer transcript re-uses the cached prefix
    // summary rather than re-summarising from scratch; same summary prefix.
    let transcript_b = transcript(7, 2);
    let second = manager.project(&transcript_b, "a1").await.unwrap();

    assert!(first.summary.is_some());
    assert!(second.summary.is_some());
}

#[tokio::test]
async fn hierarchical_names_phases_and_packs_budget() {
    let transcript = transcript(7, 2);
    let manager = HierarchicalManager::new(Arc::new(SummarizerMock))
        .with_rounds_per_phase(3)
        .with_naming(PhaseNaming::Descriptive)
        .with_max_tokens(2_000);

    let window = manager.project(&transcript, "a1").await.unwrap();

    // The current phase (round 7) stays verbatim.
    assert!(window.messages.iter().all(|m| m.round == 7));
    let summary = window.summary.unwrap();
    assert!(summary.contains("Initial Positions"));
    assert!(summary.contains("Early Deliberation"));
    assert!(summary.contains("Overview"), "expected a global overview: {}", summary);
    assert!(window.estimated_tokens <= 2_000);
}

#[tokio::test]
async fn masking_respects_preservation_rules() {
    let mut transcript = transcript(5, 2);
    transcript[0].content = format!("Background chatter. {}", "noise ".repeat(500));
    transcript[1].content = format!("In conclusion, option B. {}", "reasoning ".repeat(500));

    let manager = ObservationMaskingManager::new(MaskingConfig {
        strategy: MaskingStrategy::Truncate,
        ..Default::default()
    });
    let window = manager.project(&transcript, "a3").await.unwrap();

    // The verbose message is masked; the decision-bearing one is not.
    assert!(window.messages[0].content.ends_with("[truncated]"));
    assert!(!window.messages[1].content.ends_with("[truncated]"));
    assert_eq!(window.stats.masked, 1);
    assert_eq!(window.original_count, window.retained_count);
}

#[tokio::test]
async fn hybrid_masking_falls_through_to_key_points() {
    let mut transcript = transcript(5, 2);
    transcript[0].content = "substantive matter ".repeat(300).trim_end().to_string();

    let manager = ObservationMaskingManager::new(MaskingConfig {
        strategy: MaskingStrategy::Hybrid,
        ..Default::default()
    })
    .with_llm(Arc::new(SummarizerMock));

    let window = manager.project(&transcript, "a3").await.unwrap();
    assert!(
        window.messages[0].content.starts_with("[Key points from Agent 1]"),
        "got: {}",
        window.messages[0].content
    );
}
