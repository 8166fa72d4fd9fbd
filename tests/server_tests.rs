//! HTTP boundary tests: request envelopes, status codes, health, metrics.

mod common;

use common::{harness, register_mock, Harness, Outcome};
use promptroute::config::RouterConfig;
use promptroute::request::Message;
use promptroute::server;
use tower::ServiceExt;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};

fn no_fallback_config() -> RouterConfig {
    RouterConfig {
        fallback_enabled: false,
        ..Default::default()
    }
}

fn app(h: &Harness) -> axum::Router {
    server::router(h.handle.clone())
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn prompt_endpoint_returns_envelope() {
    let h = harness(no_fallback_config());
    register_mock(&h, "gpt-4", "openai", vec![Outcome::ok("Hi.", 1, 1)]);

    let response = app(&h)
        .oneshot(post_json(
            "/prompt",
            serde_json::json!({"prompt": "Hello", "model_id": "gpt-4"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["response"], "Hi.");
    assert_eq!(body["model_used"], "gpt-4");
    assert_eq!(body["tokens"]["total"], 2);
    assert_eq!(body["cached"], false);
    assert!(body["request_id"].as_str().unwrap().len() > 10);
    assert!(body["processing_time"]["total"].is_u64());
    assert!(body["classification"].is_object());
}

#[tokio::test]
async fn empty_prompt_maps_to_400() {
    let h = harness(no_fallback_config());
    let response = app(&h)
        .oneshot(post_json("/prompt", serde_json::json!({"prompt": "  "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn pipeline_failure_maps_to_500() {
    let h = harness(no_fallback_config());
    h.handle.catalog.set_availability("gpt-4o", false).await;

    let response = app(&h)
        .oneshot(post_json(
            "/prompt",
            serde_json::json!({"prompt": "Hello", "model_id": "gpt-4o"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["code"], "MODEL_UNAVAILABLE");
}

#[tokio::test]
async fn chat_completions_accepts_message_lists() {
    let h = harness(no_fallback_config());
    register_mock(&h, "gpt-4o", "openai", vec![Outcome::ok("Sure.", 5, 2)]);

    let messages = vec![
        Message::system("be brief"),
        Message::user("Summarize this in one word"),
    ];
    let response = app(&h)
        .oneshot(post_json(
            "/chat/completions",
            serde_json::json!({
                "model": "gpt-4o",
                "messages": messages,
                "max_tokens": 32,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["response"], "Sure.");
    assert_eq!(body["model_used"], "gpt-4o");
    assert_eq!(body["tokens"]["prompt"], 5);
}

#[tokio::test]
async fn chat_completions_streams_chunk_records() {
    use promptroute::response::StreamingChunk;

    let h = harness(no_fallback_config());
    let adapter = common::MockAdapter::new("gpt-4o", "openai", h.store.clone()).with_stream(vec![
        StreamingChunk::text("gpt-4o", "Hel"),
        StreamingChunk::text("gpt-4o", "lo"),
        StreamingChunk::terminal("gpt-4o", Some("stop".to_string())),
    ]);
    h.handle.registry.register(std::sync::Arc::new(adapter));

    let response = app(&h)
        .oneshot(post_json(
            "/chat/completions",
            serde_json::json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "Hello"}],
                "stream": true,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let chunks: Vec<StreamingChunk> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].chunk, "Hel");
    assert_eq!(chunks[1].chunk, "lo");
    assert!(chunks[2].done);
    assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
}

#[tokio::test]
async fn health_reports_store_status() {
    let h = harness(no_fallback_config());
    let response = app(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "ok");
}

#[tokio::test]
async fn metrics_expose_counters_and_circuits() {
    let h = harness(no_fallback_config());
    register_mock(&h, "gpt-4", "openai", vec![Outcome::ok("Hi.", 1, 1)]);

    let app = app(&h);
    let _ = app
        .clone()
        .oneshot(post_json(
            "/prompt",
            serde_json::json!({"prompt": "Hello", "model_id": "gpt-4"}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["requests_total"], 1);
    assert_eq!(body["successes"], 1);
    assert_eq!(body["circuits"]["openai:gpt-4"], "closed");
    assert_eq!(body["degraded_mode"], false);
    assert!(body["model_latency"]["gpt-4"]["count"].is_u64());
}
