//! Shared primitives for provider adapters.
//!
//! Applications and the pipeline interact with providers through the
//! [`ProviderAdapter`] trait. The trait abstracts over concrete vendor
//! implementations while the supporting structs describe the dispatched
//! request and the adapter's self-description.
//!
//! All implementations **must** be thread-safe (`Send + Sync`) so they can
//! be shared between async tasks; adapter instances are memoized
//! process-wide by the registry.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::promptroute::error::RouterError;
use crate::promptroute::normalizer::NormalizedPrompt;
use crate::promptroute::request::GenerationOptions;
use crate::promptroute::response::{ChunkStream, NormalizedResponse};
use crate::promptroute::retry::RetryPolicy;

/// What the pipeline hands an adapter after normalization.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    /// Provider-suitable prompt produced by the normalization engine.
    pub prompt: NormalizedPrompt,
    /// Neutral generation options.
    pub options: GenerationOptions,
    /// Wall-clock budget for one unary attempt.
    pub timeout: Duration,
    /// Retry budget for this dispatch.
    pub retry: RetryPolicy,
}

impl AdapterRequest {
    /// A request with default timeout and unary retry budget.
    pub fn new(prompt: NormalizedPrompt, options: GenerationOptions) -> Self {
        AdapterRequest {
            prompt,
            options,
            timeout: Duration::from_millis(30_000),
            retry: RetryPolicy::unary(),
        }
    }
}

/// Introspection snapshot of one adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterDetails {
    pub model_id: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    /// Rolling average latency over the last window, when recorded.
    pub average_latency_ms: Option<f64>,
}

/// Bounded rolling window of observed call latencies.
///
/// The mutex is only held for push/read, never across an await point.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: Mutex<VecDeque<u64>>,
    capacity: usize,
}

impl LatencyWindow {
    /// The standard window size used by adapters.
    pub fn new() -> Self {
        LatencyWindow::with_capacity(10)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LatencyWindow {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record one observed latency, evicting the oldest sample when full.
    pub fn record(&self, millis: u64) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(millis);
    }

    /// Rolling average, `None` until the first sample lands.
    pub fn average(&self) -> Option<f64> {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        LatencyWindow::new()
    }
}

/// Trait defining the interface to one provider-backed model.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The model id this adapter was created for (possibly an alias).
    fn model_id(&self) -> &str;

    /// Provider tag (`openai`, `anthropic`, `lmstudio`).
    fn provider(&self) -> &str;

    /// Capabilities this model advertises.
    fn capabilities(&self) -> &[String];

    /// Rolling latency window fed by successful unary calls.
    fn latency(&self) -> &LatencyWindow;

    /// Whether the adapter believes the backing model is currently usable.
    async fn is_available(&self) -> bool;

    /// One full request/response completion, with retries and circuit
    /// breaking applied inside the adapter.
    async fn generate_completion(
        &self,
        request: &AdapterRequest,
    ) -> Result<NormalizedResponse, RouterError>;

    /// A finite, non-restartable chunk stream. Errors after the stream has
    /// started surface as a terminal error chunk, never as a panic or an
    /// `Err` item.
    async fn generate_completion_stream(
        &self,
        request: &AdapterRequest,
    ) -> Result<ChunkStream, RouterError>;

    /// Approximate token count: one token per four characters, rounded up.
    fn count_tokens(&self, text: &str) -> usize {
        (text.len() + 3) / 4
    }

    /// Introspection snapshot.
    fn details(&self) -> AdapterDetails {
        AdapterDetails {
            model_id: self.model_id().to_string(),
            provider: self.provider().to_string(),
            capabilities: self.capabilities().to_vec(),
            average_latency_ms: self.latency().average(),
        }
    }
}
