//! Shared utilities used across provider adapter implementations.
//!
//! The helpers in this module are useful when implementing additional
//! providers: a tuned shared [`reqwest`] client, the HTTP-to-error-kind
//! classification table, the line-buffered SSE driver that turns a provider
//! byte stream into [`StreamingChunk`]s, and the resilience wrapper that
//! applies the circuit breaker and retry schedule around every dispatch.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use lazy_static::lazy_static;

use crate::promptroute::circuit_breaker::{CircuitBreaker, CircuitStatus};
use crate::promptroute::error::{ProviderErrorKind, RouterError};
use crate::promptroute::normalizer::NormalizedPrompt;
use crate::promptroute::request::{Message, ToolDefinition};
use crate::promptroute::response::{ChunkStream, StreamingChunk};
use crate::promptroute::retry::RetryPolicy;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// The single client instance keeps TLS sessions and DNS lookups warm
    /// which significantly reduces latency when many concurrent requests are
    /// issued to upstream providers.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Classify an HTTP response into a [`ProviderErrorKind`].
///
/// Status codes decide first (401/403 auth, 429 rate limit, 5xx upstream);
/// everything else falls through to sniffing the provider error body, which
/// catches policies that arrive as 400s (content filters, exhausted quotas).
pub fn classify_http(status: u16, body: &str) -> ProviderErrorKind {
    match status {
        401 | 403 => return ProviderErrorKind::Authentication,
        429 => return ProviderErrorKind::RateLimit,
        s if s >= 500 => return ProviderErrorKind::ServerError,
        _ => {}
    }

    let haystack = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(parsed) => {
            let error_type = parsed
                .pointer("/error/type")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let error_code = parsed
                .pointer("/error/code")
                .map(|v| v.to_string())
                .unwrap_or_default();
            let message = parsed
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            format!("{} {} {}", error_type, error_code, message).to_lowercase()
        }
        Err(_) => body.to_lowercase(),
    };

    if haystack.contains("rate limit") || haystack.contains("rate_limit") {
        ProviderErrorKind::RateLimit
    } else if haystack.contains("content_policy")
        || haystack.contains("content policy")
        || haystack.contains("content_filter")
    {
        ProviderErrorKind::ContentFiltered
    } else if haystack.contains("insufficient_quota")
        || haystack.contains("quota")
        || haystack.contains("billing")
    {
        ProviderErrorKind::QuotaExceeded
    } else if haystack.contains("authentication")
        || haystack.contains("invalid_api_key")
        || haystack.contains("api key")
    {
        ProviderErrorKind::Authentication
    } else {
        ProviderErrorKind::Unknown
    }
}

/// Classify a transport-level failure (connect, timeout, broken body).
pub fn classify_transport(_err: &reqwest::Error) -> ProviderErrorKind {
    ProviderErrorKind::ServerError
}

/// Keep error details loggable without dragging whole response bodies along.
pub fn truncate_detail(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &body[..cut])
    }
}

/// Apply the circuit breaker and retry schedule around one dispatch.
///
/// The circuit is probed once up front: `open` fails immediately before any
/// network call. Each failed attempt reports its classified kind back to the
/// breaker; retryable kinds sleep out the backoff and try again until the
/// budget is exhausted, at which point the last error propagates.
pub async fn call_with_resilience<T, F, Fut>(
    breaker: &CircuitBreaker,
    provider: &str,
    model: &str,
    stream: bool,
    policy: RetryPolicy,
    mut attempt_call: F,
) -> Result<T, RouterError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, RouterError>> + Send,
    T: Send,
{
    let observed = breaker.probe(provider, model, stream).await;
    if observed == CircuitStatus::Open {
        return Err(RouterError::ModelUnavailable {
            model: model.to_string(),
            state: observed.to_string(),
        });
    }

    let mut attempt = 0u32;
    loop {
        match attempt_call().await {
            Ok(value) => {
                breaker.on_success(provider, model, stream).await;
                return Ok(value);
            }
            Err(err) => {
                if let Some(kind) = err.kind() {
                    breaker.on_failure(provider, model, stream, kind, observed).await;
                }
                if err.retryable() && attempt < policy.max_retries {
                    let delay = policy.backoff_delay(attempt);
                    log::debug!(
                        "retrying {}:{} after {:?} (attempt {} of {}): {}",
                        provider,
                        model,
                        delay,
                        attempt + 1,
                        policy.max_retries,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

// -- SSE plumbing --

/// Line assembler for SSE bodies: trailing partial lines are carried across
/// reads, complete lines come back with their terminators stripped.
#[derive(Default)]
pub struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        SseLineBuffer::default()
    }

    /// Feed one network read, returning every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(
                line.trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string(),
            );
        }
        lines
    }
}

/// Extract the payload of an SSE `data:` line.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(|s| s.trim())
}

/// Provider-specific vocabulary for one SSE stream.
///
/// Implementations translate raw lines into [`StreamingChunk`]s; the driver
/// owns buffering, read errors, and the exactly-one-terminal-chunk
/// guarantee. Unparseable lines must be logged and skipped, never raised.
pub trait SseEventHandler: Send {
    /// The concrete model name for chunks (may be updated mid-stream).
    fn model(&self) -> &str;

    /// Process one complete line. Return `true` once the logical end of the
    /// stream was seen (a terminal chunk has been queued).
    fn on_line(&mut self, line: &str, out: &mut VecDeque<StreamingChunk>) -> bool;

    /// The body ended without an explicit terminal event. Implementations
    /// queue the terminal chunk here if they have not already done so.
    fn on_eof(&mut self, out: &mut VecDeque<StreamingChunk>);
}

struct SseDriver<B, H> {
    body: B,
    lines: SseLineBuffer,
    pending: VecDeque<StreamingChunk>,
    handler: H,
    finished: bool,
    source_complete: bool,
}

/// Run an [`SseEventHandler`] over a streaming HTTP response.
///
/// The returned stream is finite and non-restartable: it yields chunks in
/// provider order and terminates right after the single `done = true` chunk.
/// Dropping it cancels the underlying body read.
pub fn sse_chunk_stream<H>(response: reqwest::Response, handler: H) -> ChunkStream
where
    H: SseEventHandler + 'static,
{
    let driver = SseDriver {
        body: Box::pin(response.bytes_stream()),
        lines: SseLineBuffer::new(),
        pending: VecDeque::new(),
        handler,
        finished: false,
        source_complete: false,
    };

    Box::pin(futures_util::stream::unfold(driver, |mut d| async move {
        loop {
            if let Some(chunk) = d.pending.pop_front() {
                if chunk.done {
                    d.finished = true;
                }
                return Some((chunk, d));
            }
            if d.finished {
                return None;
            }
            if d.source_complete {
                d.handler.on_eof(&mut d.pending);
                if d.pending.is_empty() {
                    return None;
                }
                continue;
            }
            match d.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = d.lines.push(&bytes);
                    for line in lines {
                        if d.handler.on_line(&line, &mut d.pending) {
                            d.source_complete = true;
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    if log::log_enabled!(log::Level::Error) {
                        log::error!("stream read failed for {}: {}", d.handler.model(), err);
                    }
                    let code = classify_transport(&err).code();
                    d.pending
                        .push_back(StreamingChunk::terminal_error(d.handler.model(), code));
                    d.source_complete = true;
                }
                None => {
                    d.source_complete = true;
                }
            }
        }
    }))
}

// -- OpenAI-compatible wire helpers --

/// Serialise a normalized prompt to OpenAI-style wire messages. System
/// messages stay in the list; a plain text prompt becomes one user message.
pub fn openai_wire_messages(prompt: &NormalizedPrompt) -> Vec<serde_json::Value> {
    let messages = match prompt {
        NormalizedPrompt::Text(text) => {
            return vec![serde_json::json!({"role": "user", "content": text})]
        }
        NormalizedPrompt::Messages(messages) => messages,
    };

    messages
        .iter()
        .map(|message| match message {
            Message::System { content } => serde_json::json!({
                "role": "system",
                "content": content.as_deref().unwrap_or(""),
            }),
            Message::User { content } => serde_json::json!({
                "role": "user",
                "content": content.as_deref().unwrap_or(""),
            }),
            Message::Assistant {
                content,
                function_call,
                tool_calls,
            } => {
                let mut wire = serde_json::json!({
                    "role": "assistant",
                    "content": content.clone(),
                });
                if let Some(call) = function_call {
                    wire["function_call"] = serde_json::json!({
                        "name": call.name,
                        "arguments": call.arguments,
                    });
                }
                if let Some(calls) = tool_calls {
                    wire["tool_calls"] = serde_json::Value::Array(
                        calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments,
                                    },
                                })
                            })
                            .collect(),
                    );
                }
                wire
            }
            Message::Function { name, content } => serde_json::json!({
                "role": "function",
                "name": name,
                "content": content.as_deref().unwrap_or(""),
            }),
            Message::Tool {
                tool_call_id,
                content,
            } => serde_json::json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content.as_deref().unwrap_or(""),
            }),
        })
        .collect()
}

/// Serialise tool definitions to the OpenAI `tools` array shape.
pub fn openai_wire_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            })
        })
        .collect()
}
