//! Shared test support: an in-process scripted adapter and a router harness.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use promptroute::adapter::{AdapterRequest, LatencyWindow, ProviderAdapter};
use promptroute::adapters::common::call_with_resilience;
use promptroute::circuit_breaker::CircuitBreaker;
use promptroute::config::RouterConfig;
use promptroute::error::{ProviderErrorKind, RouterError};
use promptroute::pipeline::{Pipeline, RouterHandle};
use promptroute::response::{
    ChunkStream, NormalizedResponse, StreamingChunk, TokenUsage,
};
use promptroute::retry::RetryPolicy;
use promptroute::store::{MemoryStore, SharedStore};

/// One scripted call outcome for a [`MockAdapter`].
pub enum Outcome {
    Succeed {
        text: String,
        prompt_tokens: usize,
        completion_tokens: usize,
    },
    Fail(ProviderErrorKind),
}

impl Outcome {
    pub fn ok(text: &str, prompt_tokens: usize, completion_tokens: usize) -> Self {
        Outcome::Succeed {
            text: text.to_string(),
            prompt_tokens,
            completion_tokens,
        }
    }
}

/// Scripted in-process adapter.
///
/// Runs its attempts through the same resilience wrapper as the real
/// adapters (circuit probe + retry loop), with a 1ms backoff base so retry
/// tests stay fast.
pub struct MockAdapter {
    model: String,
    provider: String,
    capabilities: Vec<String>,
    script: Mutex<VecDeque<Outcome>>,
    stream_chunks: Mutex<Option<Vec<StreamingChunk>>>,
    calls: AtomicUsize,
    breaker: CircuitBreaker,
    latency: LatencyWindow,
}

impl MockAdapter {
    pub fn new(model: &str, provider: &str, store: Arc<dyn SharedStore>) -> Self {
        MockAdapter {
            model: model.to_string(),
            provider: provider.to_string(),
            capabilities: vec![
                "chat".to_string(),
                "code-generation".to_string(),
                "streaming".to_string(),
            ],
            script: Mutex::new(VecDeque::new()),
            stream_chunks: Mutex::new(None),
            calls: AtomicUsize::new(0),
            breaker: CircuitBreaker::new(store),
            latency: LatencyWindow::new(),
        }
    }

    pub fn script(self, outcomes: Vec<Outcome>) -> Self {
        *self.script.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_stream(self, chunks: Vec<StreamingChunk>) -> Self {
        *self.stream_chunks.lock().unwrap() = Some(chunks);
        self
    }

    /// Number of attempts made against this adapter (retries included).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fast_retry(&self, request: &AdapterRequest) -> RetryPolicy {
        RetryPolicy {
            max_retries: request.retry.max_retries,
            initial_delay_ms: 1,
        }
    }

    async fn attempt(&self) -> Result<NormalizedResponse, RouterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().unwrap().pop_front();
        match outcome {
            Some(Outcome::Succeed {
                text,
                prompt_tokens,
                completion_tokens,
            }) => {
                self.latency.record(1);
                Ok(NormalizedResponse::new(
                    text,
                    TokenUsage::new(prompt_tokens, completion_tokens),
                    self.model.clone(),
                ))
            }
            Some(Outcome::Fail(kind)) => Err(RouterError::from_kind(
                kind,
                &self.provider,
                &self.model,
                "scripted failure",
            )),
            None => {
                self.latency.record(1);
                Ok(NormalizedResponse::new(
                    "ok",
                    TokenUsage::new(1, 1),
                    self.model.clone(),
                ))
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn latency(&self) -> &LatencyWindow {
        &self.latency
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate_completion(
        &self,
        request: &AdapterRequest,
    ) -> Result<NormalizedResponse, RouterError> {
        call_with_resilience(
            &self.breaker,
            &self.provider,
            &self.model,
            false,
            self.fast_retry(request),
            || self.attempt(),
        )
        .await
    }

    async fn generate_completion_stream(
        &self,
        request: &AdapterRequest,
    ) -> Result<ChunkStream, RouterError> {
        let provider = self.provider.clone();
        let model = self.model.clone();
        let breaker = self.breaker.clone();
        let policy = self.fast_retry(request);
        call_with_resilience(&breaker, &provider, &model, true, policy, || async {
            let chunks = self
                .stream_chunks
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| vec![StreamingChunk::terminal(self.model.clone(), None)]);
            let stream: ChunkStream = Box::pin(futures_util::stream::iter(chunks));
            Ok(stream)
        })
        .await
    }
}

/// A router wired to an in-memory store, ready for mock registration.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub handle: Arc<RouterHandle>,
    pub pipeline: Pipeline,
}

pub fn harness(config: RouterConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let handle = Arc::new(RouterHandle::new(config, store.clone()));
    let pipeline = Pipeline::new(handle.clone());
    Harness {
        store,
        handle,
        pipeline,
    }
}

/// Register a scripted adapter for a model id and return a handle to it.
pub fn register_mock(
    harness: &Harness,
    model: &str,
    provider: &str,
    outcomes: Vec<Outcome>,
) -> Arc<MockAdapter> {
    let adapter = Arc::new(
        MockAdapter::new(model, provider, harness.store.clone()).script(outcomes),
    );
    harness.handle.registry.register(adapter.clone());
    adapter
}
