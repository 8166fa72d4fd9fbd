//! Retry, circuit breaker, and fallback ladder behavior end to end.

mod common;

use std::time::Duration;

use common::{harness, register_mock, Outcome};
use promptroute::circuit_breaker::{CircuitBreaker, CircuitStatus};
use promptroute::config::RouterConfig;
use promptroute::error::{ProviderErrorKind, RouterError};
use promptroute::request::PromptRequest;
use promptroute::store::SharedStore;

fn no_fallback_config() -> RouterConfig {
    RouterConfig {
        fallback_enabled: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn transient_server_errors_are_retried_until_success() {
    let h = harness(no_fallback_config());
    let mock = register_mock(
        &h,
        "gpt-4o",
        "openai",
        vec![
            Outcome::Fail(ProviderErrorKind::ServerError),
            Outcome::Fail(ProviderErrorKind::ServerError),
            Outcome::Fail(ProviderErrorKind::ServerError),
            Outcome::ok("finally", 2, 3),
        ],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.max_retries = Some(3);

    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.text, "finally");
    // Three failures plus the final success: four attempts in total.
    assert_eq!(mock.calls(), 4);
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_last_error() {
    let h = harness(no_fallback_config());
    let mock = register_mock(
        &h,
        "gpt-4o",
        "openai",
        vec![
            Outcome::Fail(ProviderErrorKind::RateLimit),
            Outcome::Fail(ProviderErrorKind::RateLimit),
            Outcome::Fail(ProviderErrorKind::RateLimit),
        ],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.max_retries = Some(2);

    let err = h.pipeline.process(request).await.unwrap_err();
    assert_eq!(err.code(), "MODEL_RATE_LIMIT");
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn non_retryable_errors_fail_after_one_attempt() {
    let h = harness(no_fallback_config());
    let mock = register_mock(
        &h,
        "gpt-4o",
        "openai",
        vec![Outcome::Fail(ProviderErrorKind::ContentFiltered)],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.max_retries = Some(3);

    let err = h.pipeline.process(request).await.unwrap_err();
    assert_eq!(err.code(), "MODEL_CONTENT_FILTERED");
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn auth_failure_trips_circuit_and_recovers_through_half_open() {
    let h = harness(no_fallback_config());
    let mock = register_mock(
        &h,
        "gpt-4o",
        "openai",
        vec![
            Outcome::Fail(ProviderErrorKind::Authentication),
            Outcome::ok("recovered", 1, 1),
        ],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());

    // First call: one attempt, authentication error, circuit trips open.
    let err = h.pipeline.process(request.clone()).await.unwrap_err();
    assert_eq!(err.code(), "MODEL_AUTHENTICATION");
    assert_eq!(mock.calls(), 1);

    let breaker = CircuitBreaker::new(h.store.clone());
    assert_eq!(
        breaker.probe("openai", "gpt-4o", false).await,
        CircuitStatus::Open
    );

    // Second call fails immediately, before any adapter attempt.
    let err = h.pipeline.process(request.clone()).await.unwrap_err();
    assert_eq!(err.code(), "MODEL_UNAVAILABLE");
    assert_eq!(mock.calls(), 1);

    // Age the trip record past the half-open threshold.
    let key = CircuitBreaker::key("openai", "gpt-4o", false);
    let aged = serde_json::json!({
        "status": "open",
        "timestamp": chrono::Utc::now().timestamp() - 31,
    });
    h.store
        .put(&key, aged.to_string(), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(
        breaker.probe("openai", "gpt-4o", false).await,
        CircuitStatus::HalfOpen
    );

    // The probe call goes through and a success closes the circuit.
    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.text, "recovered");
    assert_eq!(mock.calls(), 2);
    assert_eq!(
        breaker.probe("openai", "gpt-4o", false).await,
        CircuitStatus::Closed
    );
}

#[tokio::test]
async fn fallback_reaches_healthy_alternative() {
    let h = harness(RouterConfig::default());
    h.handle.catalog.set_availability("gpt-4o", false).await;
    // Highest-priority available alternative is claude-sonnet-4-0.
    let sonnet = register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![Outcome::ok("from the alternative", 3, 4)],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());

    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.model_used, "claude-sonnet-4-0");
    assert_eq!(response.text, "from the alternative");
    assert_eq!(sonnet.calls(), 1);
}

#[tokio::test]
async fn circuit_open_on_primary_with_fallback_disabled_is_unavailable() {
    let h = harness(no_fallback_config());
    register_mock(&h, "gpt-4o", "openai", vec![]);

    // Trip the circuit directly through the shared store.
    let breaker = CircuitBreaker::new(h.store.clone());
    breaker
        .on_failure(
            "openai",
            "gpt-4o",
            false,
            ProviderErrorKind::Authentication,
            CircuitStatus::Closed,
        )
        .await;

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    let err = h.pipeline.process(request).await.unwrap_err();
    assert_eq!(err.code(), "MODEL_UNAVAILABLE");
}

#[tokio::test]
async fn exactly_fallback_levels_attempts_before_all_models_failed() {
    let config = RouterConfig {
        fallback_levels: 2,
        ..Default::default()
    };
    let h = harness(config);
    h.handle.catalog.set_availability("gpt-4o", false).await;

    // The two highest-priority alternatives fail; the third is never tried.
    let sonnet = register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![Outcome::Fail(ProviderErrorKind::Unknown)],
    );
    let mini = register_mock(
        &h,
        "gpt-4o-mini",
        "openai",
        vec![Outcome::Fail(ProviderErrorKind::Unknown)],
    );
    let haiku = register_mock(&h, "claude-haiku-3-5", "anthropic", vec![]);

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.max_retries = Some(0);

    let err = h.pipeline.process(request).await.unwrap_err();
    match err {
        RouterError::AllModelsFailed { primary, .. } => assert_eq!(primary, "gpt-4o"),
        other => panic!("expected AllModelsFailed, got {:?}", other),
    }
    assert_eq!(sonnet.calls(), 1);
    assert_eq!(mini.calls(), 1);
    assert_eq!(haiku.calls(), 0);
}

#[tokio::test]
async fn repeated_failed_fallbacks_are_counted_per_key() {
    let config = RouterConfig {
        fallback_levels: 1,
        ..Default::default()
    };
    let h = harness(config);
    h.handle.catalog.set_availability("gpt-4o", false).await;
    register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![
            Outcome::Fail(ProviderErrorKind::Unknown),
            Outcome::Fail(ProviderErrorKind::Unknown),
        ],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.max_retries = Some(0);

    let _ = h.pipeline.process(request.clone()).await;
    let _ = h.pipeline.process(request).await;

    let counters = h.handle.fallback.counters();
    assert_eq!(counters.get("gpt-4o->claude-sonnet-4-0"), Some(&2));
    assert_eq!(counters.get("gpt-4o->claude-sonnet-4-0-failed"), Some(&2));
}

#[tokio::test]
async fn auto_degraded_mode_engages_after_repeated_failures() {
    let config = RouterConfig {
        fallback_levels: 1,
        auto_degraded_mode: true,
        ..Default::default()
    };
    let h = harness(config);
    h.handle.catalog.set_availability("gpt-4o", false).await;
    register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![
            Outcome::Fail(ProviderErrorKind::Unknown),
            Outcome::Fail(ProviderErrorKind::Unknown),
        ],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.max_retries = Some(0);

    assert!(!h.handle.fallback.degraded_mode());
    let _ = h.pipeline.process(request.clone()).await;
    let _ = h.pipeline.process(request.clone()).await;
    assert!(h.handle.fallback.degraded_mode());

    // With degraded mode engaged, the next request short-circuits to the
    // canned response instead of attempting providers.
    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.model_used, "degraded-mode");
    assert_eq!(response.tokens.total_tokens, 0);

    // The hourly reset clears the auto-engaged flag.
    h.handle.fallback.reset_counters();
    assert!(!h.handle.fallback.degraded_mode());
}

#[tokio::test]
async fn per_request_degraded_override_wins() {
    let h = harness(RouterConfig::default());
    h.handle.catalog.set_availability("gpt-4o", false).await;
    register_mock(
        &h,
        "claude-sonnet-4-0",
        "anthropic",
        vec![Outcome::ok("alternative", 1, 1)],
    );

    let mut request = PromptRequest::new("Hello");
    request.model_id = Some("gpt-4o".to_string());
    request.routing.degraded_mode = Some(true);

    let response = h.pipeline.process(request).await.unwrap();
    assert_eq!(response.model_used, "degraded-mode");
}
