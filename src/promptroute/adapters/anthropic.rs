//! Anthropic Messages API adapter.
//!
//! Unlike the OpenAI family, Anthropic takes the system prompt in a
//! distinguished top-level field, returns content as a typed block list
//! (`text`, `tool_use`, `thinking`), and streams through a named event
//! vocabulary (`message_start`, `content_block_delta`, `message_delta`,
//! `message_stop`, `error`) instead of bare deltas.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use crate::promptroute::adapter::{AdapterRequest, LatencyWindow, ProviderAdapter};
use crate::promptroute::adapters::common::{
    call_with_resilience, classify_http, classify_transport, get_shared_http_client,
    sse_chunk_stream, sse_data, truncate_detail, SseEventHandler,
};
use crate::promptroute::circuit_breaker::CircuitBreaker;
use crate::promptroute::error::{ProviderErrorKind, RouterError};
use crate::promptroute::normalizer::NormalizedPrompt;
use crate::promptroute::request::{Message, ToolCall, ToolChoice};
use crate::promptroute::response::{ChunkStream, NormalizedResponse, StreamingChunk, TokenUsage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic requires an explicit completion budget on every request.
const DEFAULT_MAX_TOKENS: u32 = 1024;

fn resolve_alias(model_id: &str) -> &str {
    match model_id {
        "anthropic" | "anthropic-default" | "claude" => "claude-sonnet-4-0",
        other => other,
    }
}

/// Adapter for Anthropic's native Messages API.
pub struct AnthropicAdapter {
    model: String,
    concrete_model: String,
    base_url: String,
    credential: Mutex<Option<String>>,
    capabilities: Vec<String>,
    latency: LatencyWindow,
    breaker: CircuitBreaker,
}

impl AnthropicAdapter {
    pub fn new(model_id: &str, base_url: &str, breaker: CircuitBreaker) -> Self {
        AnthropicAdapter {
            model: model_id.to_string(),
            concrete_model: resolve_alias(model_id).to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: Mutex::new(None),
            capabilities: vec![
                "chat".to_string(),
                "code-generation".to_string(),
                "reasoning".to_string(),
                "creative-writing".to_string(),
                "tool-use".to_string(),
                "streaming".to_string(),
            ],
            latency: LatencyWindow::new(),
            breaker,
        }
    }

    fn credential(&self) -> Result<String, RouterError> {
        let mut slot = self.credential.lock().unwrap();
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }
        match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => {
                *slot = Some(key.clone());
                Ok(key)
            }
            _ => Err(RouterError::ModelAuthentication {
                provider: "anthropic".to_string(),
                model: self.concrete_model.clone(),
                detail: "ANTHROPIC_API_KEY is not set".to_string(),
            }),
        }
    }

    /// Split the normalized prompt into Anthropic's `(system, messages)`
    /// shape. Function results and tool results travel as user-role content.
    fn wire_messages(prompt: &NormalizedPrompt) -> (Option<String>, Vec<serde_json::Value>) {
        let messages = match prompt {
            NormalizedPrompt::Text(text) => {
                return (
                    None,
                    vec![serde_json::json!({"role": "user", "content": text})],
                )
            }
            NormalizedPrompt::Messages(messages) => messages,
        };

        let mut system = String::new();
        let mut wire = Vec::with_capacity(messages.len());
        for message in messages {
            match message {
                Message::System { content } => {
                    if let Some(content) = content {
                        if !system.is_empty() {
                            system.push('\n');
                        }
                        system.push_str(content);
                    }
                }
                Message::User { content } => wire.push(serde_json::json!({
                    "role": "user",
                    "content": content.as_deref().unwrap_or(""),
                })),
                Message::Assistant { content, .. } => wire.push(serde_json::json!({
                    "role": "assistant",
                    "content": content.as_deref().unwrap_or(""),
                })),
                Message::Function { name, content } => wire.push(serde_json::json!({
                    "role": "user",
                    "content": format!(
                        "[{} result] {}",
                        name,
                        content.as_deref().unwrap_or("")
                    ),
                })),
                Message::Tool {
                    tool_call_id,
                    content,
                } => wire.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content.as_deref().unwrap_or(""),
                    }],
                })),
            }
        }

        let system = if system.is_empty() { None } else { Some(system) };
        (system, wire)
    }

    fn wire_tool_choice(choice: &ToolChoice) -> serde_json::Value {
        match choice {
            ToolChoice::Auto | ToolChoice::None => serde_json::json!({"type": "auto"}),
            ToolChoice::Required => serde_json::json!({"type": "any"}),
            ToolChoice::Named(name) => serde_json::json!({"type": "tool", "name": name}),
        }
    }

    fn build_body(&self, request: &AdapterRequest, stream: bool) -> serde_json::Value {
        let options = &request.options;
        let (system, messages) = Self::wire_messages(&request.prompt);

        let mut body = serde_json::json!({
            "model": self.concrete_model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if !options.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(options.stop);
        }
        if !options.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(
                options
                    .tools
                    .iter()
                    .map(|tool| {
                        serde_json::json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.parameters,
                        })
                    })
                    .collect(),
            );
            if let Some(choice) = &options.tool_choice {
                body["tool_choice"] = Self::wire_tool_choice(choice);
            }
        }
        if let Some(budget) = options.thinking_budget_tokens {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
        body
    }

    async fn attempt_completion(
        &self,
        request: &AdapterRequest,
    ) -> Result<NormalizedResponse, RouterError> {
        let credential = self.credential()?;
        let url = format!("{}/messages", self.base_url);
        let started = Instant::now();

        let response = get_shared_http_client()
            .post(&url)
            .header("x-api-key", &credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(request, false))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|err| {
                RouterError::from_kind(
                    classify_transport(&err),
                    "anthropic",
                    &self.concrete_model,
                    err.to_string(),
                )
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| {
            RouterError::from_kind(
                classify_transport(&err),
                "anthropic",
                &self.concrete_model,
                err.to_string(),
            )
        })?;

        if !(200..300).contains(&status) {
            let kind = classify_http(status, &text);
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "AnthropicAdapter::generate_completion: HTTP {} from {}: {}",
                    status,
                    url,
                    truncate_detail(&text)
                );
            }
            return Err(RouterError::from_kind(
                kind,
                "anthropic",
                &self.concrete_model,
                truncate_detail(&text),
            ));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
            RouterError::from_kind(
                ProviderErrorKind::Unknown,
                "anthropic",
                &self.concrete_model,
                format!("unparseable response body: {}", err),
            )
        })?;

        let elapsed = started.elapsed().as_millis() as u64;
        self.latency.record(elapsed);
        let mut normalized = self.normalize_response(&parsed);
        normalized.processing_time_ms = elapsed;
        Ok(normalized)
    }

    fn normalize_response(&self, parsed: &serde_json::Value) -> NormalizedResponse {
        let mut text = String::new();
        let mut thinking = String::new();
        let mut tool_calls = Vec::new();

        if let Some(blocks) = parsed.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(chunk) = block.get("text").and_then(|t| t.as_str()) {
                            text.push_str(chunk);
                        }
                    }
                    Some("thinking") => {
                        if let Some(chunk) = block.get("thinking").and_then(|t| t.as_str()) {
                            thinking.push_str(chunk);
                        }
                    }
                    Some("tool_use") => {
                        let id = block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let arguments = block
                            .get("input")
                            .map(|input| input.to_string())
                            .unwrap_or_else(|| "{}".to_string());
                        tool_calls.push(ToolCall {
                            id,
                            name,
                            arguments,
                        });
                    }
                    _ => {}
                }
            }
        }

        let input_tokens = parsed
            .pointer("/usage/input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let output_tokens = parsed
            .pointer("/usage/output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| self.count_tokens(&text) as u64)
            as usize;

        let model_used = parsed
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.concrete_model)
            .to_string();

        let mut raw = serde_json::Map::new();
        if let Some(id) = parsed.get("id") {
            raw.insert("id".to_string(), id.clone());
        }
        if let Some(stop_reason) = parsed.get("stop_reason") {
            raw.insert("stop_reason".to_string(), stop_reason.clone());
        }

        let mut normalized = NormalizedResponse::new(
            text,
            TokenUsage::new(input_tokens, output_tokens),
            model_used,
        );
        if !thinking.is_empty() {
            normalized.thinking = Some(thinking);
        }
        if !tool_calls.is_empty() {
            normalized.tool_calls = Some(tool_calls);
        }
        if !raw.is_empty() {
            normalized.raw = Some(serde_json::Value::Object(raw));
        }
        normalized
    }

    async fn open_stream(&self, request: &AdapterRequest) -> Result<ChunkStream, RouterError> {
        let credential = self.credential()?;
        let url = format!("{}/messages", self.base_url);

        let response = get_shared_http_client()
            .post(&url)
            .header("x-api-key", &credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(request, true))
            .send()
            .await
            .map_err(|err| {
                RouterError::from_kind(
                    classify_transport(&err),
                    "anthropic",
                    &self.concrete_model,
                    err.to_string(),
                )
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            let kind = classify_http(status, &text);
            return Err(RouterError::from_kind(
                kind,
                "anthropic",
                &self.concrete_model,
                truncate_detail(&text),
            ));
        }

        Ok(sse_chunk_stream(
            response,
            AnthropicStreamHandler::new(self.concrete_model.clone()),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn latency(&self) -> &LatencyWindow {
        &self.latency
    }

    async fn is_available(&self) -> bool {
        self.credential().is_ok()
    }

    async fn generate_completion(
        &self,
        request: &AdapterRequest,
    ) -> Result<NormalizedResponse, RouterError> {
        call_with_resilience(
            &self.breaker,
            "anthropic",
            &self.concrete_model,
            false,
            request.retry,
            || self.attempt_completion(request),
        )
        .await
    }

    async fn generate_completion_stream(
        &self,
        request: &AdapterRequest,
    ) -> Result<ChunkStream, RouterError> {
        call_with_resilience(
            &self.breaker,
            "anthropic",
            &self.concrete_model,
            true,
            request.retry,
            || self.open_stream(request),
        )
        .await
    }
}

fn classify_stream_error(error_type: &str) -> ProviderErrorKind {
    match error_type {
        "authentication_error" | "permission_error" => ProviderErrorKind::Authentication,
        "rate_limit_error" => ProviderErrorKind::RateLimit,
        "overloaded_error" | "api_error" => ProviderErrorKind::ServerError,
        _ => ProviderErrorKind::Unknown,
    }
}

/// SSE vocabulary of the Messages streaming format.
struct AnthropicStreamHandler {
    model: String,
    stop_reason: Option<String>,
    terminal_sent: bool,
}

impl AnthropicStreamHandler {
    fn new(model: String) -> Self {
        AnthropicStreamHandler {
            model,
            stop_reason: None,
            terminal_sent: false,
        }
    }
}

impl SseEventHandler for AnthropicStreamHandler {
    fn model(&self) -> &str {
        &self.model
    }

    fn on_line(&mut self, line: &str, out: &mut VecDeque<StreamingChunk>) -> bool {
        let data = match sse_data(line) {
            Some(data) if !data.is_empty() => data,
            _ => return false,
        };

        let parsed: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("skipping unparseable stream line: {} ({})", err, data);
                return false;
            }
        };

        match parsed.get("type").and_then(|t| t.as_str()) {
            Some("message_start") => {
                // The opening event names the concrete deployed model.
                if let Some(model) = parsed.pointer("/message/model").and_then(|m| m.as_str()) {
                    self.model = model.to_string();
                }
                false
            }
            Some("content_block_delta") => {
                match parsed.pointer("/delta/type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = parsed.pointer("/delta/text").and_then(|t| t.as_str())
                        {
                            if !text.is_empty() {
                                out.push_back(StreamingChunk::text(self.model.clone(), text));
                            }
                        }
                    }
                    Some("thinking_delta") => {
                        // Thinking tokens are observability-only; not forwarded.
                        if let Some(text) =
                            parsed.pointer("/delta/thinking").and_then(|t| t.as_str())
                        {
                            log::debug!("thinking delta ({} chars)", text.len());
                        }
                    }
                    _ => {}
                }
                false
            }
            Some("message_delta") => {
                if let Some(reason) = parsed
                    .pointer("/delta/stop_reason")
                    .and_then(|r| r.as_str())
                {
                    self.stop_reason = Some(reason.to_string());
                }
                false
            }
            Some("message_stop") => {
                if !self.terminal_sent {
                    self.terminal_sent = true;
                    out.push_back(StreamingChunk::terminal(
                        self.model.clone(),
                        self.stop_reason.take(),
                    ));
                }
                true
            }
            Some("error") => {
                if !self.terminal_sent {
                    self.terminal_sent = true;
                    let error_type = parsed
                        .pointer("/error/type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("");
                    out.push_back(StreamingChunk::terminal_error(
                        self.model.clone(),
                        classify_stream_error(error_type).code(),
                    ));
                }
                true
            }
            _ => false,
        }
    }

    fn on_eof(&mut self, out: &mut VecDeque<StreamingChunk>) {
        if !self.terminal_sent {
            self.terminal_sent = true;
            out.push_back(StreamingChunk::terminal(
                self.model.clone(),
                self.stop_reason.take(),
            ));
        }
    }
}
