//! The request pipeline.
//!
//! One [`Pipeline::process`] call per request: validate → cache lookup →
//! classify → (optional two-model chain) → resolve model → normalize →
//! dispatch → annotate. Each step's duration is captured and attached to
//! the response. Streaming requests run the same front half, then bypass
//! the cache and hand the adapter's chunk stream straight to the caller.
//!
//! The [`RouterHandle`] is the typed dependency bundle — classifier,
//! routing engine, normalization engine, cache, shared store, catalog,
//! registry, fallback controller, and metrics — passed to every step. The
//! orchestrator references the registry and the fallback controller; the
//! controller calls adapters; adapters never call back up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::promptroute::adapter::AdapterRequest;
use crate::promptroute::adapters::{infer_provider, AdapterRegistry};
use crate::promptroute::cache::{fingerprint, CacheStrategy, ResponseCache};
use crate::promptroute::classifier::{Classification, Classifier, RulesClassifier};
use crate::promptroute::config::RouterConfig;
use crate::promptroute::error::RouterError;
use crate::promptroute::fallback::{FallbackController, DEGRADED_MODEL_ID};
use crate::promptroute::metrics::Metrics;
use crate::promptroute::normalizer::NormalizationEngine;
use crate::promptroute::request::PromptRequest;
use crate::promptroute::response::{ChunkStream, NormalizedResponse, StepTimings, TokenUsage};
use crate::promptroute::retry::RetryPolicy;
use crate::promptroute::routing::{
    default_descriptors, ModelCatalog, ModelDescriptor, RoutingEngine,
};
use crate::promptroute::store::SharedStore;

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Typed dependency bundle threaded through every pipeline step.
pub struct RouterHandle {
    pub config: RouterConfig,
    pub store: Arc<dyn SharedStore>,
    pub cache: ResponseCache,
    pub classifier: Arc<dyn Classifier>,
    pub routing: RoutingEngine,
    pub normalization: NormalizationEngine,
    pub catalog: Arc<ModelCatalog>,
    pub registry: Arc<AdapterRegistry>,
    pub fallback: Arc<FallbackController>,
    pub metrics: Arc<Metrics>,
}

impl RouterHandle {
    /// Handle with stock components wired to the given store.
    pub fn new(config: RouterConfig, store: Arc<dyn SharedStore>) -> Self {
        let cache = ResponseCache::new(
            store.clone(),
            config.cache_strategy,
            Duration::from_secs(config.cache_ttl_secs),
        );
        let registry = Arc::new(AdapterRegistry::new(store.clone(), config.providers.clone()));
        let fallback = Arc::new(FallbackController::new(
            config.fallback_enabled,
            config.fallback_levels,
            config.monitor_fallbacks,
            config.degraded_mode,
            config.auto_degraded_mode,
        ));
        let routing = RoutingEngine::new(config.default_strategy());

        RouterHandle {
            cache,
            routing,
            registry,
            fallback,
            store,
            classifier: Arc::new(RulesClassifier::new()),
            normalization: NormalizationEngine::new(),
            catalog: Arc::new(ModelCatalog::with_static(default_descriptors())),
            metrics: Arc::new(Metrics::new()),
            config,
        }
    }

    /// Swap in a different classifier implementation.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Swap in a different descriptor catalog.
    pub fn with_catalog(mut self, catalog: Arc<ModelCatalog>) -> Self {
        self.catalog = catalog;
        self
    }
}

/// The end-to-end request orchestrator.
pub struct Pipeline {
    handle: Arc<RouterHandle>,
}

impl Pipeline {
    pub fn new(handle: Arc<RouterHandle>) -> Self {
        Pipeline { handle }
    }

    pub fn handle(&self) -> &Arc<RouterHandle> {
        &self.handle
    }

    fn timeout_for(&self, request: &PromptRequest) -> Duration {
        Duration::from_millis(
            request
                .timeout_ms
                .unwrap_or(self.handle.config.request_timeout_ms),
        )
    }

    fn retry_for(&self, request: &PromptRequest, stream: bool) -> RetryPolicy {
        let base = if stream {
            RetryPolicy::streaming()
        } else {
            RetryPolicy::unary()
        };
        match request.max_retries {
            Some(max_retries) => base.with_max_retries(max_retries),
            None => base,
        }
    }

    /// Resolve the model for a request: an explicit id bypasses routing, an
    /// unspecified one goes through the routing engine.
    fn resolve_model(
        &self,
        request: &PromptRequest,
        classification: &Classification,
        snapshot: &[ModelDescriptor],
    ) -> Result<String, RouterError> {
        if let Some(explicit) = &request.model_id {
            return Ok(explicit.clone());
        }
        self.handle
            .routing
            .route(classification, snapshot, &request.routing)
            .ok_or_else(|| RouterError::ModelUnavailable {
                model: "(routing)".to_string(),
                state: "no available candidate".to_string(),
            })
    }

    /// One unary request through the full pipeline.
    pub async fn process(
        &self,
        request: PromptRequest,
    ) -> Result<NormalizedResponse, RouterError> {
        let total_start = Instant::now();
        self.handle.metrics.record_request();
        let mut timings = StepTimings::default();

        // Step 1: validate.
        let step_start = Instant::now();
        if request.is_empty() {
            self.handle.metrics.record_failure();
            return Err(RouterError::InvalidRequest {
                reason: "prompt must not be empty".to_string(),
            });
        }
        let content = request.content_text();
        let print = fingerprint(
            &content,
            request.model_id.as_deref().unwrap_or("auto"),
            &request.options,
        );
        timings.preprocessing = elapsed_ms(step_start);

        // Step 2: cache lookup.
        if self.handle.cache.strategy() != CacheStrategy::None {
            if let Some(mut hit) = self.handle.cache.lookup(&print).await {
                self.handle.metrics.record_cache_hit();
                hit.cached = true;
                timings.total = elapsed_ms(total_start);
                hit.processing_time_ms = timings.total;
                hit.timings = Some(timings);
                self.handle.metrics.record_success();
                return Ok(hit);
            }
            self.handle.metrics.record_cache_miss();
        }

        // Step 3: classify.
        let step_start = Instant::now();
        let classification = self
            .handle
            .classifier
            .classify(&content, &request.classifier)
            .await;
        timings.classification = elapsed_ms(step_start);

        // Step 4: complex analytical work goes through the model chain.
        if self.handle.config.chain_enabled && classification.chain_worthy() {
            self.handle.metrics.record_chain_request();
            let mut response = self.run_chain(&request, &classification).await?;
            timings.total = elapsed_ms(total_start);
            timings.model_generation = timings
                .total
                .saturating_sub(timings.preprocessing + timings.classification);
            response.processing_time_ms = timings.total;
            response.timings = Some(timings);
            response.classification = Some(classification);
            self.handle.metrics.record_success();
            return Ok(response);
        }

        // Step 5: resolve the model.
        let step_start = Instant::now();
        let snapshot = self.handle.catalog.snapshot().await;
        let model_id = match self.resolve_model(&request, &classification, &snapshot) {
            Ok(model_id) => model_id,
            Err(err) => {
                self.handle.metrics.record_failure();
                return Err(err);
            }
        };
        timings.routing = elapsed_ms(step_start);

        // Step 6: availability gate. Unknown ids are dispatched anyway — the
        // registry falls back to the default provider for them.
        let descriptor = snapshot.iter().find(|m| m.id == model_id).cloned();
        if let Some(d) = &descriptor {
            if !d.available {
                let cause = RouterError::ModelUnavailable {
                    model: model_id.clone(),
                    state: "unavailable".to_string(),
                };
                return self
                    .fallback_or_fail(
                        &model_id,
                        cause,
                        &request,
                        &snapshot,
                        &classification,
                        timings,
                        total_start,
                    )
                    .await;
            }
        }

        // Step 7: normalize the prompt for the chosen model.
        let step_start = Instant::now();
        let provider = descriptor
            .as_ref()
            .map(|d| d.provider.clone())
            .unwrap_or_else(|| infer_provider(&model_id).to_string());
        let prompt = self
            .handle
            .normalization
            .normalize(&request, &model_id, &provider);
        timings.normalization = elapsed_ms(step_start);

        // Step 8: dispatch.
        let step_start = Instant::now();
        let adapter = self.handle.registry.resolve(&model_id);
        let adapter_request = AdapterRequest {
            prompt,
            options: request.options.clone(),
            timeout: self.timeout_for(&request),
            retry: self.retry_for(&request, false),
        };
        let result = adapter.generate_completion(&adapter_request).await;
        timings.model_generation = elapsed_ms(step_start);

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                if matches!(err, RouterError::ModelUnavailable { .. }) {
                    return self
                        .fallback_or_fail(
                            &model_id,
                            err,
                            &request,
                            &snapshot,
                            &classification,
                            timings,
                            total_start,
                        )
                        .await;
                }
                self.handle.metrics.record_failure();
                return Err(err);
            }
        };

        // Fold the rolling latency back into routing inputs and metrics.
        if let Some(average) = adapter.latency().average() {
            self.handle
                .catalog
                .record_latency(&model_id, average as u64)
                .await;
        }
        self.handle
            .metrics
            .record_latency(&response.model_used, timings.model_generation);

        // Step 9: annotate and cache.
        self.annotate_cost(&mut response, descriptor.as_ref());
        response.classification = Some(classification);
        timings.total = elapsed_ms(total_start);
        response.processing_time_ms = timings.total;
        response.timings = Some(timings);

        self.handle
            .cache
            .record(&print, content.len(), &response, request.cache_ttl_secs)
            .await;
        self.handle.metrics.record_success();
        Ok(response)
    }

    /// One streaming request: same front half, no cache, no chain; the
    /// adapter's chunk stream is forwarded unchanged.
    pub async fn process_stream(
        &self,
        request: PromptRequest,
    ) -> Result<ChunkStream, RouterError> {
        self.handle.metrics.record_request();
        self.handle.metrics.record_streaming_request();

        if request.is_empty() {
            self.handle.metrics.record_failure();
            return Err(RouterError::InvalidRequest {
                reason: "prompt must not be empty".to_string(),
            });
        }
        let content = request.content_text();

        let classification = self
            .handle
            .classifier
            .classify(&content, &request.classifier)
            .await;

        let snapshot = self.handle.catalog.snapshot().await;
        let model_id = self.resolve_model(&request, &classification, &snapshot)?;

        let descriptor = snapshot.iter().find(|m| m.id == model_id);
        if let Some(d) = descriptor {
            if !d.available {
                let cause = RouterError::ModelUnavailable {
                    model: model_id.clone(),
                    state: "unavailable".to_string(),
                };
                return self
                    .stream_fallback_or_fail(&model_id, cause, &request, &snapshot)
                    .await;
            }
        }

        let provider = descriptor
            .map(|d| d.provider.clone())
            .unwrap_or_else(|| infer_provider(&model_id).to_string());
        let prompt = self
            .handle
            .normalization
            .normalize(&request, &model_id, &provider);

        let adapter = self.handle.registry.resolve(&model_id);
        let adapter_request = AdapterRequest {
            prompt,
            options: request.options.clone(),
            timeout: self.timeout_for(&request),
            retry: self.retry_for(&request, true),
        };
        match adapter.generate_completion_stream(&adapter_request).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                if matches!(err, RouterError::ModelUnavailable { .. }) {
                    return self
                        .stream_fallback_or_fail(&model_id, err, &request, &snapshot)
                        .await;
                }
                self.handle.metrics.record_failure();
                Err(err)
            }
        }
    }

    fn annotate_cost(&self, response: &mut NormalizedResponse, descriptor: Option<&ModelDescriptor>) {
        if let Some(cost) = descriptor.and_then(|d| d.cost_per_1k_tokens) {
            response.cost_estimate =
                Some(response.tokens.total_tokens as f64 * cost / 1000.0);
        }
    }

    /// Route a failed primary through the fallback controller, or surface
    /// the unavailability when fallback is off.
    async fn fallback_or_fail(
        &self,
        primary: &str,
        cause: RouterError,
        request: &PromptRequest,
        snapshot: &[ModelDescriptor],
        classification: &Classification,
        mut timings: StepTimings,
        total_start: Instant,
    ) -> Result<NormalizedResponse, RouterError> {
        if !self.handle.fallback.enabled() {
            self.handle.metrics.record_failure();
            return Err(cause);
        }
        self.handle.metrics.record_fallback_attempt();

        let step_start = Instant::now();
        let result = self
            .handle
            .fallback
            .execute(
                primary,
                cause,
                request,
                snapshot,
                &self.handle.registry,
                &self.handle.normalization,
                self.timeout_for(request),
                self.retry_for(request, false),
            )
            .await;
        timings.model_generation += elapsed_ms(step_start);

        match result {
            Ok(mut response) => {
                if response.model_used == DEGRADED_MODEL_ID {
                    self.handle.metrics.record_degraded_response();
                } else {
                    let descriptor = snapshot.iter().find(|m| m.id == response.model_used);
                    self.annotate_cost(&mut response, descriptor);
                    self.handle
                        .metrics
                        .record_latency(&response.model_used, timings.model_generation);
                }
                response.classification = Some(classification.clone());
                timings.total = elapsed_ms(total_start);
                response.processing_time_ms = timings.total;
                response.timings = Some(timings);
                self.handle.metrics.record_success();
                Ok(response)
            }
            Err(err) => {
                self.handle.metrics.record_failure();
                Err(err)
            }
        }
    }

    /// Streaming counterpart of [`Pipeline::fallback_or_fail`]: the ladder
    /// opens a chunk stream on an alternative model instead of returning a
    /// unary response.
    async fn stream_fallback_or_fail(
        &self,
        primary: &str,
        cause: RouterError,
        request: &PromptRequest,
        snapshot: &[ModelDescriptor],
    ) -> Result<ChunkStream, RouterError> {
        if !self.handle.fallback.enabled() {
            self.handle.metrics.record_failure();
            return Err(cause);
        }
        self.handle.metrics.record_fallback_attempt();

        let result = self
            .handle
            .fallback
            .execute_stream(
                primary,
                cause,
                request,
                snapshot,
                &self.handle.registry,
                &self.handle.normalization,
                self.timeout_for(request),
                self.retry_for(request, true),
            )
            .await;
        match result {
            Ok(stream) => {
                self.handle.metrics.record_success();
                Ok(stream)
            }
            Err(err) => {
                self.handle.metrics.record_failure();
                Err(err)
            }
        }
    }

    /// Two-step model chain for complex analytical work: the best reasoning
    /// model drafts, the best writing model refines, the results are joined.
    /// A failure on the second step returns whatever the first produced.
    async fn run_chain(
        &self,
        request: &PromptRequest,
        classification: &Classification,
    ) -> Result<NormalizedResponse, RouterError> {
        let snapshot = self.handle.catalog.snapshot().await;
        let step_one = best_with_capability(&snapshot, "reasoning")
            .or_else(|| best_overall(&snapshot))
            .ok_or_else(|| RouterError::ModelUnavailable {
                model: "(chain)".to_string(),
                state: "no available candidate".to_string(),
            })?;
        let step_two = best_with_capability(&snapshot, "creative-writing")
            .or_else(|| best_overall(&snapshot))
            .unwrap_or_else(|| step_one.clone());

        log::info!(
            "chain dispatch: {} -> {} ({:?}/{:?})",
            step_one.id,
            step_two.id,
            classification.prompt_type,
            classification.complexity
        );

        let timeout = self.timeout_for(request);
        let retry = self.retry_for(request, false);

        let first_prompt =
            self.handle
                .normalization
                .normalize(request, &step_one.id, &step_one.provider);
        let first_request = AdapterRequest {
            prompt: first_prompt,
            options: request.options.clone(),
            timeout,
            retry,
        };
        let first = self
            .handle
            .registry
            .resolve(&step_one.id)
            .generate_completion(&first_request)
            .await
            .map_err(|cause| RouterError::RequestProcessingFailed {
                stage: "chain".to_string(),
                cause: Box::new(cause),
            })?;

        // Step two consumes step one's output as its prompt.
        let mut second_input = PromptRequest::new(first.text.clone());
        second_input.options = request.options.clone();
        let second_prompt =
            self.handle
                .normalization
                .normalize(&second_input, &step_two.id, &step_two.provider);
        let second_request = AdapterRequest {
            prompt: second_prompt,
            options: request.options.clone(),
            timeout,
            retry,
        };
        match self
            .handle
            .registry
            .resolve(&step_two.id)
            .generate_completion(&second_request)
            .await
        {
            Ok(second) => Ok(combine_chain(first, second)),
            Err(err) => {
                log::warn!("chain step two ({}) failed, returning step one: {}", step_two.id, err);
                Ok(first)
            }
        }
    }
}

fn best_with_capability(
    snapshot: &[ModelDescriptor],
    capability: &str,
) -> Option<ModelDescriptor> {
    snapshot
        .iter()
        .filter(|m| m.available && m.capabilities.contains(capability))
        .max_by(|a, b| {
            a.quality
                .partial_cmp(&b.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.priority.cmp(&b.priority))
        })
        .cloned()
}

fn best_overall(snapshot: &[ModelDescriptor]) -> Option<ModelDescriptor> {
    snapshot
        .iter()
        .filter(|m| m.available)
        .max_by(|a, b| {
            a.quality
                .partial_cmp(&b.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.priority.cmp(&b.priority))
        })
        .cloned()
}

/// Join the two chain responses: texts separated by a blank line, model ids
/// joined by ` -> `, token counts summed.
fn combine_chain(first: NormalizedResponse, second: NormalizedResponse) -> NormalizedResponse {
    let tokens = TokenUsage::new(
        first.tokens.prompt_tokens + second.tokens.prompt_tokens,
        first.tokens.completion_tokens + second.tokens.completion_tokens,
    );
    let mut combined = NormalizedResponse::new(
        format!("{}\n\n{}", first.text, second.text),
        tokens,
        format!("{} -> {}", first.model_used, second.model_used),
    );
    combined.cost_estimate = match (first.cost_estimate, second.cost_estimate) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    };
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_combination_sums_tokens_and_joins_ids() {
        let first = NormalizedResponse::new("analysis", TokenUsage::new(10, 20), "claude-sonnet-4-0");
        let second = NormalizedResponse::new("polished", TokenUsage::new(5, 15), "gpt-4o");
        let combined = combine_chain(first, second);
        assert_eq!(combined.text, "analysis\n\npolished");
        assert_eq!(combined.model_used, "claude-sonnet-4-0 -> gpt-4o");
        assert_eq!(combined.tokens, TokenUsage::new(15, 35));
        assert!(combined.cost_estimate.is_none());
    }

    #[test]
    fn best_with_capability_prefers_quality() {
        let snapshot = default_descriptors();
        let best = best_with_capability(&snapshot, "reasoning").unwrap();
        assert_eq!(best.id, "claude-sonnet-4-0");
        assert!(best_with_capability(&snapshot, "time-travel").is_none());
    }
}
