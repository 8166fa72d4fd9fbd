//! Normalized response and streaming chunk types.
//!
//! Every provider reply is flattened into a [`NormalizedResponse`] so callers
//! never see provider-specific shapes. Streaming replies arrive as a finite
//! sequence of [`StreamingChunk`]s terminated by exactly one chunk with
//! `done = true`.

use std::pin::Pin;

use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::promptroute::classifier::Classification;
use crate::promptroute::request::{FunctionCall, Message, ToolCall};

/// Token accounting for one completed request.
///
/// Invariant: `total_tokens = prompt_tokens + completion_tokens`. Serialises
/// with the short wire names (`prompt`, `completion`, `total`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "prompt")]
    pub prompt_tokens: usize,
    #[serde(rename = "completion")]
    pub completion_tokens: usize,
    #[serde(rename = "total")]
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Build a usage record with the total derived from its parts.
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Zero usage, used by degraded-mode responses.
    pub fn zero() -> Self {
        TokenUsage::new(0, 0)
    }
}

/// Per-step wall-clock timings in milliseconds, captured by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTimings {
    pub total: u64,
    pub preprocessing: u64,
    pub classification: u64,
    pub routing: u64,
    pub normalization: u64,
    pub model_generation: u64,
}

/// A provider response normalized into the router's single shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Assistant text.
    pub text: String,
    /// Token accounting as billed (or estimated) by the provider.
    pub tokens: TokenUsage,
    /// The concrete model that actually produced the response.
    pub model_used: String,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Full message trail, for callers that continue the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    /// Whether this response was served from the result cache.
    #[serde(default)]
    pub cached: bool,
    /// Classification echo, attached by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Estimated cost in dollars; absent when the descriptor has no cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    /// Extended-thinking text extracted from providers that emit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Raw provider extras that do not round-trip through normalized fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    /// Per-step timing breakdown, attached by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<StepTimings>,
}

impl NormalizedResponse {
    /// A minimal successful response; the pipeline annotates the rest.
    pub fn new(text: impl Into<String>, tokens: TokenUsage, model_used: impl Into<String>) -> Self {
        NormalizedResponse {
            text: text.into(),
            tokens,
            model_used: model_used.into(),
            processing_time_ms: 0,
            function_call: None,
            tool_calls: None,
            messages: None,
            cached: false,
            classification: None,
            cost_estimate: None,
            thinking: None,
            raw: None,
            timings: None,
        }
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// One unit of incremental streaming output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingChunk {
    /// Incremental text delta; empty on terminal chunks.
    pub chunk: String,
    /// Terminal flag. Exactly one chunk per stream has `done = true`.
    pub done: bool,
    /// The concrete model producing the stream.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
    /// Classified error code, set only when `error = true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl StreamingChunk {
    /// An incremental text chunk.
    pub fn text(model: impl Into<String>, chunk: impl Into<String>) -> Self {
        StreamingChunk {
            chunk: chunk.into(),
            done: false,
            model: model.into(),
            finish_reason: None,
            error: false,
            error_code: None,
        }
    }

    /// The terminal chunk closing a healthy stream.
    pub fn terminal(model: impl Into<String>, finish_reason: Option<String>) -> Self {
        StreamingChunk {
            chunk: String::new(),
            done: true,
            model: model.into(),
            finish_reason,
            error: false,
            error_code: None,
        }
    }

    /// The terminal chunk closing a failed stream.
    pub fn terminal_error(model: impl Into<String>, code: &str) -> Self {
        StreamingChunk {
            chunk: String::new(),
            done: true,
            model: model.into(),
            finish_reason: None,
            error: true,
            error_code: Some(code.to_string()),
        }
    }
}

/// A finite, non-restartable sequence of streaming chunks.
///
/// Dropping the stream cancels the underlying provider read.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamingChunk> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_total_is_sum() {
        let usage = TokenUsage::new(7, 5);
        assert_eq!(usage.total_tokens, 12);
    }

    #[test]
    fn chunk_serialization_drops_empty_flags() {
        let chunk = StreamingChunk::text("gpt-4o", "Hel");
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("error_code").is_none());
        assert_eq!(json["done"], false);

        let terminal = StreamingChunk::terminal_error("gpt-4o", "RATE_LIMIT");
        let json = serde_json::to_value(&terminal).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["error_code"], "RATE_LIMIT");
        assert_eq!(json["done"], true);
    }

    #[test]
    fn cached_response_round_trips_through_json() {
        let mut resp = NormalizedResponse::new("Hi.", TokenUsage::new(1, 1), "gpt-4o");
        resp.cost_estimate = Some(0.00001);
        let serialized = serde_json::to_string(&resp).unwrap();
        let back: NormalizedResponse = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back.text, "Hi.");
        assert_eq!(back.tokens, resp.tokens);
        assert_eq!(back.model_used, "gpt-4o");
        assert!(!back.cached);
    }
}
