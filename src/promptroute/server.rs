//! HTTP boundary for the router.
//!
//! Four endpoints: `POST /prompt` (single prompt in, normalized envelope
//! out), `POST /chat/completions` (message list, optional SSE streaming),
//! `GET /health` (liveness + backing-store status), and `GET /metrics`
//! (counters, latency summaries, fallback counters, circuit states).
//!
//! Every request gets a `request_id`; failures surface as the
//! `{error, code, request_id}` envelope with 400 for invalid input and 500
//! for pipeline failures.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::promptroute::circuit_breaker::CircuitBreaker;
use crate::promptroute::classifier::{Classification, ClassifierOptions};
use crate::promptroute::error::RouterError;
use crate::promptroute::pipeline::{Pipeline, RouterHandle};
use crate::promptroute::request::{
    FunctionCall, GenerationOptions, Message, PromptRequest, ToolCall, ToolChoice, ToolDefinition,
};
use crate::promptroute::response::{NormalizedResponse, StepTimings, TokenUsage};
use crate::promptroute::routing::RoutingOptions;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Build the axum router for a handle.
pub fn router(handle: Arc<RouterHandle>) -> Router {
    let state = AppState {
        pipeline: Arc::new(Pipeline::new(handle)),
    };
    Router::new()
        .route("/prompt", post(handle_prompt))
        .route("/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        // Bound concurrent in-flight requests; slow clients suspend their
        // own streams without starving the rest of the pool.
        .layer(tower::limit::ConcurrencyLimitLayer::new(1_024))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(handle: Arc<RouterHandle>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(handle);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("promptroute listening on {}", addr);
    axum::serve(listener, app).await
}

#[derive(Deserialize)]
struct PromptBody {
    prompt: String,
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(rename = "classifierOptions", default)]
    classifier_options: ClassifierOptions,
    #[serde(rename = "routingOptions", default)]
    routing_options: RoutingOptions,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionsBody {
    messages: Vec<Message>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stop: Vec<String>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    tool_choice: Option<ToolChoice>,
    #[serde(default)]
    stream: bool,
    #[serde(rename = "routingOptions", default)]
    routing_options: RoutingOptions,
}

#[derive(Serialize)]
struct PromptEnvelope {
    response: String,
    model_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<Classification>,
    tokens: TokenUsage,
    processing_time: StepTimings,
    request_id: String,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost_estimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
}

impl PromptEnvelope {
    fn from_response(response: NormalizedResponse, request_id: String) -> Self {
        PromptEnvelope {
            response: response.text,
            model_used: response.model_used,
            classification: response.classification,
            tokens: response.tokens,
            processing_time: response.timings.unwrap_or_default(),
            request_id,
            cached: response.cached,
            cost_estimate: response.cost_estimate,
            function_call: response.function_call,
            tool_calls: response.tool_calls,
        }
    }
}

fn error_response(err: &RouterError, request_id: &str) -> Response {
    let status = match err {
        RouterError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({
        "error": err.to_string(),
        "code": err.code(),
        "request_id": request_id,
    });
    (status, Json(body)).into_response()
}

async fn handle_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let request = PromptRequest {
        prompt: body.prompt,
        model_id: body.model_id,
        options: GenerationOptions {
            max_tokens: body.max_tokens,
            temperature: body.temperature,
            ..Default::default()
        },
        classifier: body.classifier_options,
        routing: body.routing_options,
        timeout_ms: body.timeout_ms,
        max_retries: body.max_retries,
        ..Default::default()
    };

    match state.pipeline.process(request).await {
        Ok(response) => {
            Json(PromptEnvelope::from_response(response, request_id)).into_response()
        }
        Err(err) => {
            log::warn!("request {} failed: {} ({})", request_id, err, err.code());
            error_response(&err, &request_id)
        }
    }
}

async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatCompletionsBody>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let stream = body.stream;
    let request = PromptRequest {
        messages: Some(body.messages),
        model_id: body.model,
        options: GenerationOptions {
            max_tokens: body.max_tokens,
            temperature: body.temperature,
            top_p: body.top_p,
            stop: body.stop,
            tools: body.tools,
            tool_choice: body.tool_choice,
            ..Default::default()
        },
        stream,
        routing: body.routing_options,
        ..Default::default()
    };

    if stream {
        match state.pipeline.process_stream(request).await {
            Ok(chunks) => {
                let events = chunks.map(|chunk| {
                    let data =
                        serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                    Ok::<Event, Infallible>(Event::default().data(data))
                });
                Sse::new(events).keep_alive(KeepAlive::default()).into_response()
            }
            Err(err) => {
                log::warn!("stream request {} failed: {}", request_id, err);
                error_response(&err, &request_id)
            }
        }
    } else {
        match state.pipeline.process(request).await {
            Ok(response) => {
                Json(PromptEnvelope::from_response(response, request_id)).into_response()
            }
            Err(err) => {
                log::warn!("request {} failed: {} ({})", request_id, err, err.code());
                error_response(&err, &request_id)
            }
        }
    }
}

async fn handle_health(State(state): State<AppState>) -> Response {
    let handle = state.pipeline.handle();
    let store_ok = handle.store.ping().await;
    let body = serde_json::json!({
        "status": "ok",
        "store": if store_ok { "ok" } else { "unreachable" },
    });
    Json(body).into_response()
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    let handle = state.pipeline.handle();
    let mut snapshot = handle.metrics.snapshot();

    // Circuit states for every adapter this process has touched.
    let breaker = CircuitBreaker::new(handle.store.clone());
    let mut circuits = serde_json::Map::new();
    for details in handle.registry.snapshot() {
        let status = breaker
            .probe(&details.provider, &details.model_id, false)
            .await;
        circuits.insert(
            format!("{}:{}", details.provider, details.model_id),
            serde_json::Value::String(status.to_string()),
        );
    }

    if let Some(object) = snapshot.as_object_mut() {
        object.insert("circuits".to_string(), serde_json::Value::Object(circuits));
        object.insert(
            "fallback_counters".to_string(),
            serde_json::to_value(handle.fallback.counters()).unwrap_or_default(),
        );
        object.insert(
            "degraded_mode".to_string(),
            serde_json::Value::Bool(handle.fallback.degraded_mode()),
        );
    }
    Json(snapshot).into_response()
}
