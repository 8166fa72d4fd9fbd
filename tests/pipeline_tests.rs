//! End-to-end pipeline tests with scripted adapters.

mod common;

use common::{harness, register_mock, Outcome};
use promptroute::cache::CacheStrategy;
use promptroute::classifier::PromptType;
use promptroute::config::RouterConfig;
use promptroute::error::RouterError;
use promptroute::request::PromptRequest;

fn no_fallback_config() -> RouterConfig {
    RouterConfig {
        fallback_enabled: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn explicit_model_round_trip() {
    promptroute::init_logger();
    let h = harness(no_fallback_config());
    let mock = register_mock(&h, "gpt-4", "openai", vec![Outcome::ok("Hi.", 1, 1)]);

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4".to_string());

    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.text, "Hi.");
    assert_eq!(response.model_used, "gpt-4");
    assert_eq!(response.tokens.prompt_tokens, 1);
    assert_eq!(response.tokens.completion_tokens, 1);
    assert_eq!(response.tokens.total_tokens, 2);
    assert!(!response.cached);
    assert_eq!(mock.calls(), 1);

    // Annotations from the pipeline: classification, timings, cost.
    assert!(response.classification.is_some());
    let timings = response.timings.unwrap();
    assert_eq!(timings.total, response.processing_time_ms);
    // gpt-4 costs 0.03 per 1k tokens in the stock table: 2 tokens.
    let cost = response.cost_estimate.unwrap();
    assert!((cost - 2.0 * 0.03 / 1000.0).abs() < 1e-12);
}

#[tokio::test]
async fn identical_request_is_served_from_cache() {
    let h = harness(no_fallback_config());
    let mock = register_mock(&h, "gpt-4", "openai", vec![Outcome::ok("Hi.", 1, 1)]);

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4".to_string());

    let first = h.pipeline.process(request.clone()).await.unwrap();
    assert!(!first.cached);

    let second = h.pipeline.process(request).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.text, first.text);
    assert_eq!(second.tokens, first.tokens);
    assert_eq!(second.model_used, first.model_used);
    // The adapter was only hit once.
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn cache_strategy_none_skips_reads_and_writes() {
    let config = RouterConfig {
        cache_strategy: CacheStrategy::None,
        fallback_enabled: false,
        ..Default::default()
    };
    let h = harness(config);
    let mock = register_mock(
        &h,
        "gpt-4",
        "openai",
        vec![Outcome::ok("one", 1, 1), Outcome::ok("two", 1, 1)],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4".to_string());

    let first = h.pipeline.process(request.clone()).await.unwrap();
    let second = h.pipeline.process(request).await.unwrap();
    assert_eq!(first.text, "one");
    assert_eq!(second.text, "two");
    assert!(!second.cached);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn routed_code_prompt_picks_best_code_model() {
    let h = harness(no_fallback_config());
    // Register mocks for every stock model so whichever is picked responds.
    let sonnet = register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![Outcome::ok("fn reverse() {}", 10, 20)],
    );

    let mut request = PromptRequest::new("Write a function to reverse a linked list");
    request.routing.strategy = Some("best-model".to_string());

    let response = h.pipeline.process(request).await.unwrap();
    // Highest-quality available model with code-generation capability.
    assert_eq!(response.model_used, "claude-sonnet-4-0");
    assert_eq!(sonnet.calls(), 1);
    let classification = response.classification.unwrap();
    assert_eq!(classification.prompt_type, PromptType::Code);
}

#[tokio::test]
async fn empty_prompt_is_rejected_without_side_effects() {
    let h = harness(no_fallback_config());
    let err = h.pipeline.process(PromptRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, RouterError::InvalidRequest { .. }));
    assert_eq!(err.code(), "INVALID_REQUEST");
    // Nothing reached the cache or the circuit store.
    assert_eq!(h.store.len().await, 0);
    assert!(h.handle.registry.snapshot().is_empty());
}

#[tokio::test]
async fn degraded_mode_returns_canned_response() {
    let config = RouterConfig {
        degraded_mode: true,
        ..Default::default()
    };
    let h = harness(config);
    h.handle.catalog.set_availability("gpt-4o", false).await;

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());

    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.model_used, "degraded-mode");
    assert_eq!(response.tokens.total_tokens, 0);
    assert!(!response.text.is_empty());
}

#[tokio::test]
async fn chain_runs_two_steps_and_joins_results() {
    let config = RouterConfig {
        chain_enabled: true,
        fallback_enabled: false,
        ..Default::default()
    };
    let h = harness(config);
    // claude-sonnet-4-0 is both the best reasoning and best writing model in
    // the stock table, so both chain steps land on it.
    let sonnet = register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![Outcome::ok("draft analysis", 40, 80), Outcome::ok("polished", 20, 30)],
    );

    // Complex analytical prompt: long, structured, analytical keywords.
    let prompt = format!(
        "Analyze and compare the trade-offs of the following architectures. {}\n- latency\n- cost\n- reliability\nWhy does each choice matter?",
        "Consider the operational implications carefully in every failure mode. ".repeat(25)
    );
    let response = h.pipeline.process(PromptRequest::new(prompt)).await.unwrap();

    assert_eq!(sonnet.calls(), 2);
    assert_eq!(response.model_used, "claude-sonnet-4-0 -> claude-sonnet-4-0");
    assert_eq!(response.text, "draft analysis\n\npolished");
    assert_eq!(response.tokens.prompt_tokens, 60);
    assert_eq!(response.tokens.completion_tokens, 110);
    assert_eq!(response.tokens.total_tokens, 170);
}

#[tokio::test]
async fn chain_step_failure_returns_accumulated_output() {
    let config = RouterConfig {
        chain_enabled: true,
        fallback_enabled: false,
        ..Default::default()
    };
    let h = harness(config);
    let sonnet = register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![
            Outcome::ok("draft analysis", 40, 80),
            Outcome::Fail(promptroute::error::ProviderErrorKind::Unknown),
        ],
    );

    let prompt = format!(
        "Analyze and compare these designs. {}\n- one\n- two\n- three\nWhy?",
        "Evaluate the implications of each trade-off in depth here. ".repeat(25)
    );
    let response = h.pipeline.process(PromptRequest::new(prompt)).await.unwrap();
    assert_eq!(sonnet.calls(), 2);
    assert_eq!(response.model_used, "claude-sonnet-4-0");
    assert_eq!(response.text, "draft analysis");
}

#[tokio::test]
async fn token_totals_always_sum() {
    let h = harness(no_fallback_config());
    register_mock(&h, "gpt-4o", "openai", vec![Outcome::ok("out", 123, 456)]);
    let mut request = PromptRequest::new("Hello world");
    request.model_id = Some("gpt-4o".to_string());
    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(
        response.tokens.total_tokens,
        response.tokens.prompt_tokens + response.tokens.completion_tokens
    );
}
