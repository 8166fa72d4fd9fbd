//! OpenAI-family adapter.
//!
//! Speaks the Chat Completions wire format: request shaping from the neutral
//! option set, normalization of `choices[0].message` (content, legacy
//! `function_call`, `tool_calls`), token usage from
//! `usage.{prompt_tokens, completion_tokens, total_tokens}`, and delta-based
//! SSE streaming closed by the `[DONE]` sentinel.
//!
//! Local OpenAI-compatible deployments reuse this adapter with a different
//! base URL and provider tag (see [`super::lmstudio`]).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use crate::promptroute::adapter::{AdapterRequest, LatencyWindow, ProviderAdapter};
use crate::promptroute::adapters::common::{
    call_with_resilience, classify_http, classify_transport, get_shared_http_client,
    openai_wire_messages, openai_wire_tools, sse_chunk_stream, sse_data, truncate_detail,
    SseEventHandler,
};
use crate::promptroute::circuit_breaker::CircuitBreaker;
use crate::promptroute::error::{ProviderErrorKind, RouterError};
use crate::promptroute::request::{FunctionCall, ToolCall};
use crate::promptroute::response::{ChunkStream, NormalizedResponse, StreamingChunk, TokenUsage};

/// Chunk-text prefix carrying a serialized legacy function-call delta.
pub const FUNCTION_CALL_PREFIX: &str = "__FUNCTION_CALL__:";
/// Chunk-text prefix carrying serialized tool-call deltas.
pub const TOOL_CALLS_PREFIX: &str = "__TOOL_CALLS__:";

/// Substitute a concrete deployed model name for generic family aliases.
fn resolve_alias(model_id: &str) -> &str {
    match model_id {
        "openai" | "openai-default" | "gpt" => "gpt-4o",
        other => other,
    }
}

/// Adapter for OpenAI's Chat Completions API and compatible deployments.
pub struct OpenAIAdapter {
    /// Model id the adapter was requested for (possibly an alias).
    model: String,
    /// Alias-resolved name sent on the wire and recorded in responses.
    concrete_model: String,
    provider: &'static str,
    base_url: String,
    credential_env: &'static str,
    /// Credential used when the env var is unset; local deployments only.
    credential_default: Option<&'static str>,
    /// Lazily loaded credential, resolved on first use.
    credential: Mutex<Option<String>>,
    capabilities: Vec<String>,
    latency: LatencyWindow,
    breaker: CircuitBreaker,
}

impl OpenAIAdapter {
    /// Adapter against api.openai.com (or an override base URL).
    pub fn new(model_id: &str, base_url: &str, breaker: CircuitBreaker) -> Self {
        Self::with_provider(
            model_id,
            base_url,
            "openai",
            "OPENAI_API_KEY",
            None,
            breaker,
        )
    }

    /// General constructor, reused by OpenAI-compatible providers that only
    /// differ in endpoint, tag, and credential source.
    pub fn with_provider(
        model_id: &str,
        base_url: &str,
        provider: &'static str,
        credential_env: &'static str,
        credential_default: Option<&'static str>,
        breaker: CircuitBreaker,
    ) -> Self {
        OpenAIAdapter {
            model: model_id.to_string(),
            concrete_model: resolve_alias(model_id).to_string(),
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential_env,
            credential_default,
            credential: Mutex::new(None),
            capabilities: vec![
                "chat".to_string(),
                "code-generation".to_string(),
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
        let key = match std::env::var(self.credential_env) {
            Ok(key) if !key.is_empty() => key,
            _ => match self.credential_default {
                Some(default) => default.to_string(),
                None => {
                    return Err(RouterError::ModelAuthentication {
                        provider: self.provider.to_string(),
                        model: self.concrete_model.clone(),
                        detail: format!("{} is not set", self.credential_env),
                    })
                }
            },
        };
        *slot = Some(key.clone());
        Ok(key)
    }

    fn build_body(&self, request: &AdapterRequest, stream: bool) -> serde_json::Value {
        let options = &request.options;
        let mut body = serde_json::json!({
            "model": self.concrete_model,
            "messages": openai_wire_messages(&request.prompt),
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(frequency_penalty) = options.frequency_penalty {
            body["frequency_penalty"] = serde_json::json!(frequency_penalty);
        }
        if let Some(presence_penalty) = options.presence_penalty {
            body["presence_penalty"] = serde_json::json!(presence_penalty);
        }
        if !options.stop.is_empty() {
            body["stop"] = serde_json::json!(options.stop);
        }
        if !options.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(openai_wire_tools(&options.tools));
            if let Some(choice) = &options.tool_choice {
                body["tool_choice"] = choice.to_wire();
            }
        }
        body
    }

    async fn attempt_completion(
        &self,
        request: &AdapterRequest,
    ) -> Result<NormalizedResponse, RouterError> {
        let credential = self.credential()?;
        let url = format!("{}/chat/completions", self.base_url);
        let started = Instant::now();

        let response = get_shared_http_client()
            .post(&url)
            .bearer_auth(&credential)
            .json(&self.build_body(request, false))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|err| {
                RouterError::from_kind(
                    classify_transport(&err),
                    self.provider,
                    &self.concrete_model,
                    err.to_string(),
                )
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| {
            RouterError::from_kind(
                classify_transport(&err),
                self.provider,
                &self.concrete_model,
                err.to_string(),
            )
        })?;

        if !(200..300).contains(&status) {
            let kind = classify_http(status, &text);
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "OpenAIAdapter::generate_completion: HTTP {} from {}: {}",
                    status,
                    url,
                    truncate_detail(&text)
                );
            }
            return Err(RouterError::from_kind(
                kind,
                self.provider,
                &self.concrete_model,
                truncate_detail(&text),
            ));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
            RouterError::from_kind(
                ProviderErrorKind::Unknown,
                self.provider,
                &self.concrete_model,
                format!("unparseable response body: {}", err),
            )
        })?;

        let elapsed = started.elapsed().as_millis() as u64;
        self.latency.record(elapsed);
        let mut normalized = self.normalize_response(&parsed)?;
        normalized.processing_time_ms = elapsed;
        Ok(normalized)
    }

    fn normalize_response(
        &self,
        parsed: &serde_json::Value,
    ) -> Result<NormalizedResponse, RouterError> {
        let message = parsed
            .pointer("/choices/0/message")
            .ok_or_else(|| {
                RouterError::from_kind(
                    ProviderErrorKind::Unknown,
                    self.provider,
                    &self.concrete_model,
                    "response has no choices",
                )
            })?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let function_call = message.get("function_call").and_then(|fc| {
            Some(FunctionCall {
                name: fc.get("name")?.as_str()?.to_string(),
                arguments: fc
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .unwrap_or("{}")
                    .to_string(),
            })
        });

        let tool_calls = message
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        Some(ToolCall {
                            id: call.get("id")?.as_str()?.to_string(),
                            name: call.pointer("/function/name")?.as_str()?.to_string(),
                            arguments: call
                                .pointer("/function/arguments")
                                .and_then(|a| a.as_str())
                                .unwrap_or("{}")
                                .to_string(),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|calls| !calls.is_empty());

        let prompt_tokens = parsed
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let completion_tokens = parsed
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| {
                // Some compatible deployments omit usage; fall back to the
                // heuristic so token totals stay consistent.
                self.count_tokens(&text) as u64
            }) as usize;

        let mut raw = serde_json::Map::new();
        if let Some(id) = parsed.get("id") {
            raw.insert("id".to_string(), id.clone());
        }
        if let Some(finish) = parsed.pointer("/choices/0/finish_reason") {
            raw.insert("finish_reason".to_string(), finish.clone());
        }

        let mut normalized = NormalizedResponse::new(
            text,
            TokenUsage::new(prompt_tokens, completion_tokens),
            self.concrete_model.clone(),
        );
        normalized.function_call = function_call;
        normalized.tool_calls = tool_calls;
        if !raw.is_empty() {
            normalized.raw = Some(serde_json::Value::Object(raw));
        }
        Ok(normalized)
    }

    async fn open_stream(&self, request: &AdapterRequest) -> Result<ChunkStream, RouterError> {
        let credential = self.credential()?;
        let url = format!("{}/chat/completions", self.base_url);

        let response = get_shared_http_client()
            .post(&url)
            .bearer_auth(&credential)
            .json(&self.build_body(request, true))
            .send()
            .await
            .map_err(|err| {
                RouterError::from_kind(
                    classify_transport(&err),
                    self.provider,
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
                self.provider,
                &self.concrete_model,
                truncate_detail(&text),
            ));
        }

        Ok(sse_chunk_stream(
            response,
            OpenAIStreamHandler::new(self.concrete_model.clone()),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        self.provider
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
            self.provider,
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
            self.provider,
            &self.concrete_model,
            true,
            request.retry,
            || self.open_stream(request),
        )
        .await
    }
}

/// SSE vocabulary of the Chat Completions streaming format.
struct OpenAIStreamHandler {
    model: String,
    finish_reason: Option<String>,
    terminal_sent: bool,
}

impl OpenAIStreamHandler {
    fn new(model: String) -> Self {
        OpenAIStreamHandler {
            model,
            finish_reason: None,
            terminal_sent: false,
        }
    }
}

impl SseEventHandler for OpenAIStreamHandler {
    fn model(&self) -> &str {
        &self.model
    }

    fn on_line(&mut self, line: &str, out: &mut VecDeque<StreamingChunk>) -> bool {
        let data = match sse_data(line) {
            Some(data) if !data.is_empty() => data,
            _ => return false,
        };

        if data == "[DONE]" {
            if !self.terminal_sent {
                self.terminal_sent = true;
                out.push_back(StreamingChunk::terminal(
                    self.model.clone(),
                    self.finish_reason.take(),
                ));
            }
            return true;
        }

        let parsed: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("skipping unparseable stream line: {} ({})", err, data);
                return false;
            }
        };

        if let Some(reason) = parsed
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
        {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = match parsed.pointer("/choices/0/delta") {
            Some(delta) => delta,
            None => return false,
        };

        if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                out.push_back(StreamingChunk::text(self.model.clone(), content));
            }
        }

        // Tool/function deltas are forwarded as prefixed JSON so the client
        // can reassemble the full call across chunks.
        if let Some(function_call) = delta.get("function_call") {
            out.push_back(StreamingChunk::text(
                self.model.clone(),
                format!("{}{}", FUNCTION_CALL_PREFIX, function_call),
            ));
        }
        if let Some(tool_calls) = delta.get("tool_calls") {
            out.push_back(StreamingChunk::text(
                self.model.clone(),
                format!("{}{}", TOOL_CALLS_PREFIX, tool_calls),
            ));
        }

        false
    }

    fn on_eof(&mut self, out: &mut VecDeque<StreamingChunk>) {
        if !self.terminal_sent {
            self.terminal_sent = true;
            out.push_back(StreamingChunk::terminal(
                self.model.clone(),
                self.finish_reason.take(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> OpenAIStreamHandler {
        OpenAIStreamHandler::new("gpt-4o".to_string())
    }

    #[test]
    fn content_deltas_become_text_chunks() {
        let mut h = handler();
        let mut out = VecDeque::new();
        let done = h.on_line(
            r#"data: {"choices":[{"delta":{"content":"Hel"},"index":0}]}"#,
            &mut out,
        );
        assert!(!done);
        assert_eq!(out.pop_front().unwrap().chunk, "Hel");
    }

    #[test]
    fn done_sentinel_emits_single_terminal() {
        let mut h = handler();
        let mut out = VecDeque::new();
        h.on_line(
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            &mut out,
        );
        assert!(h.on_line("data: [DONE]", &mut out));
        let terminal = out.pop_front().unwrap();
        assert!(terminal.done);
        assert_eq!(terminal.finish_reason.as_deref(), Some("stop"));
        // A duplicate sentinel must not queue a second terminal.
        h.on_line("data: [DONE]", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn tool_call_deltas_are_prefixed() {
        let mut h = handler();
        let mut out = VecDeque::new();
        h.on_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calc","arguments":"{\"x\""}}]}}]}"#,
            &mut out,
        );
        let chunk = out.pop_front().unwrap();
        assert!(chunk.chunk.starts_with(TOOL_CALLS_PREFIX));
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let mut h = handler();
        let mut out = VecDeque::new();
        assert!(!h.on_line("data: {not json", &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn eof_without_sentinel_still_terminates() {
        let mut h = handler();
        let mut out = VecDeque::new();
        h.on_eof(&mut out);
        assert!(out.pop_front().unwrap().done);
        h.on_eof(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn alias_resolution() {
        assert_eq!(resolve_alias("openai"), "gpt-4o");
        assert_eq!(resolve_alias("gpt-4"), "gpt-4");
    }
}
