//! Fallback controller.
//!
//! When the chosen model is unavailable, the controller walks a ladder of
//! ranked alternatives (descriptor priority descending, never the primary,
//! at most `fallback_levels` attempts). Repeated fallbacks are counted per
//! `primary->fallback` key; crossing an alert threshold emits one alert per
//! key until the hourly reset. Exhausting the ladder either raises
//! `ALL_MODELS_FAILED` or, with degraded mode enabled, returns a canned
//! explanatory response with zero token counts.
//!
//! All counter state is process-local and guarded by a short-held mutex;
//! the degraded-mode flag is process-wide.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::promptroute::adapter::AdapterRequest;
use crate::promptroute::adapters::AdapterRegistry;
use crate::promptroute::error::RouterError;
use crate::promptroute::normalizer::NormalizationEngine;
use crate::promptroute::request::PromptRequest;
use crate::promptroute::response::{ChunkStream, NormalizedResponse, StreamingChunk, TokenUsage};
use crate::promptroute::retry::RetryPolicy;
use crate::promptroute::routing::ModelDescriptor;

/// Alert after this many fallback attempts per key.
const ATTEMPT_ALERT_THRESHOLD: u32 = 3;
/// Alert after this many *failed* fallback attempts per key.
const FAILED_ALERT_THRESHOLD: u32 = 2;
/// Counter and alert state lifetime.
const RESET_INTERVAL: Duration = Duration::from_secs(3_600);

/// Model id reported by canned degraded-mode responses.
pub const DEGRADED_MODEL_ID: &str = "degraded-mode";

struct CounterState {
    counts: HashMap<String, u32>,
    alerted: HashSet<String>,
    last_reset: Instant,
    /// Whether degraded mode was switched on automatically (and should be
    /// switched off again at the next reset).
    auto_engaged: bool,
}

/// Ladder executor plus fallback monitoring.
pub struct FallbackController {
    enabled: bool,
    levels: usize,
    monitor: bool,
    auto_degraded: bool,
    degraded: AtomicBool,
    state: Mutex<CounterState>,
}

impl FallbackController {
    pub fn new(enabled: bool, levels: usize, monitor: bool, degraded: bool, auto_degraded: bool) -> Self {
        FallbackController {
            enabled,
            levels,
            monitor,
            auto_degraded,
            degraded: AtomicBool::new(degraded),
            state: Mutex::new(CounterState {
                counts: HashMap::new(),
                alerted: HashSet::new(),
                last_reset: Instant::now(),
                auto_engaged: false,
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Process-wide degraded-mode flag.
    pub fn degraded_mode(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn set_degraded_mode(&self, on: bool) {
        self.degraded.store(on, Ordering::Relaxed);
    }

    fn degraded_for(&self, request: &PromptRequest) -> bool {
        request
            .routing
            .degraded_mode
            .unwrap_or_else(|| self.degraded_mode())
    }

    /// Clear counters, alert memory, and any auto-engaged degraded mode.
    /// Runs lazily once the hourly interval has elapsed; exposed for hosts
    /// that want to force a reset.
    pub fn reset_counters(&self) {
        let mut state = self.state.lock().unwrap();
        Self::reset_locked(&mut state, &self.degraded);
    }

    fn reset_locked(state: &mut CounterState, degraded: &AtomicBool) {
        state.counts.clear();
        state.alerted.clear();
        state.last_reset = Instant::now();
        if state.auto_engaged {
            degraded.store(false, Ordering::Relaxed);
            state.auto_engaged = false;
        }
    }

    /// Increment one counter; returns `true` when this increment crossed
    /// the threshold for the first time since the last reset.
    fn bump(&self, key: &str, threshold: u32) -> bool {
        if !self.monitor {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if state.last_reset.elapsed() >= RESET_INTERVAL {
            Self::reset_locked(&mut state, &self.degraded);
        }
        let count = state.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        let crossed = *count >= threshold;
        if crossed && !state.alerted.contains(key) {
            state.alerted.insert(key.to_string());
            true
        } else {
            false
        }
    }

    fn record_failed(&self, key: &str) -> bool {
        let alert = self.bump(key, FAILED_ALERT_THRESHOLD);
        if alert && self.auto_degraded {
            self.degraded.store(true, Ordering::Relaxed);
            let mut state = self.state.lock().unwrap();
            state.auto_engaged = true;
            log::warn!("auto-degraded mode engaged after repeated fallback failures");
        }
        alert
    }

    /// Counter snapshot for the metrics endpoint.
    pub fn counters(&self) -> HashMap<String, u32> {
        self.state.lock().unwrap().counts.clone()
    }

    /// The canned response served in degraded mode.
    pub fn degraded_response(&self) -> NormalizedResponse {
        let mut response = NormalizedResponse::new(
            "The service is temporarily operating in degraded mode and cannot \
             reach a language model right now. Please retry shortly.",
            TokenUsage::zero(),
            DEGRADED_MODEL_ID,
        );
        response.raw = Some(serde_json::json!({"degraded": true}));
        response
    }

    /// The canned response as a chunk stream, for streaming callers.
    pub fn degraded_stream(&self) -> ChunkStream {
        let text = self.degraded_response().text;
        Box::pin(futures_util::stream::iter(vec![
            StreamingChunk::text(DEGRADED_MODEL_ID, text),
            StreamingChunk::terminal(DEGRADED_MODEL_ID, None),
        ]))
    }

    /// Ranked ladder for a failed primary: every available model except the
    /// primary, priority descending, capped at `fallback_levels`.
    fn ladder<'a>(&self, primary: &str, snapshot: &'a [ModelDescriptor]) -> Vec<&'a ModelDescriptor> {
        let mut candidates: Vec<&ModelDescriptor> = snapshot
            .iter()
            .filter(|m| m.available && m.id != primary)
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        candidates.truncate(self.levels);
        candidates
    }

    /// Walk the fallback ladder for a failed primary.
    ///
    /// `snapshot` is the current descriptor table; candidates are every
    /// available model except the primary, by priority descending, capped at
    /// `fallback_levels`. The first success wins with its own model id. If
    /// every rung fails, degraded mode (global or per-request) yields the
    /// canned response, otherwise `AllModelsFailed` carries the last cause.
    pub async fn execute(
        &self,
        primary: &str,
        cause: RouterError,
        request: &PromptRequest,
        snapshot: &[ModelDescriptor],
        registry: &AdapterRegistry,
        normalization: &NormalizationEngine,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<NormalizedResponse, RouterError> {
        if !self.enabled {
            return Err(cause);
        }
        if self.degraded_for(request) {
            log::info!("degraded mode active, skipping fallback ladder for {}", primary);
            return Ok(self.degraded_response());
        }

        let mut last_error = cause;
        for candidate in self.ladder(primary, snapshot) {
            let attempt_key = format!("{}->{}", primary, candidate.id);
            if self.bump(&attempt_key, ATTEMPT_ALERT_THRESHOLD) {
                log::warn!("fallback alert: {} crossed {} attempts", attempt_key, ATTEMPT_ALERT_THRESHOLD);
            }

            let prompt = normalization.normalize(request, &candidate.id, &candidate.provider);
            let adapter_request = AdapterRequest {
                prompt,
                options: request.options.clone(),
                timeout,
                retry,
            };
            let adapter = registry.resolve(&candidate.id);
            match adapter.generate_completion(&adapter_request).await {
                Ok(response) => {
                    log::info!("fallback from {} to {} succeeded", primary, candidate.id);
                    return Ok(response);
                }
                Err(err) => {
                    let failed_key = format!("{}->{}-failed", primary, candidate.id);
                    if self.record_failed(&failed_key) {
                        log::warn!(
                            "fallback alert: {} crossed {} failures",
                            failed_key,
                            FAILED_ALERT_THRESHOLD
                        );
                    }
                    log::warn!("fallback from {} to {} failed: {}", primary, candidate.id, err);
                    last_error = err;
                }
            }
        }

        if self.degraded_for(request) {
            return Ok(self.degraded_response());
        }
        Err(RouterError::AllModelsFailed {
            primary: primary.to_string(),
            cause: Box::new(last_error),
        })
    }

    /// Streaming counterpart of [`FallbackController::execute`]: same
    /// ladder, counters, and degraded handling, but each rung opens a chunk
    /// stream. The first rung whose stream opens wins; chunks then flow with
    /// that model's id.
    pub async fn execute_stream(
        &self,
        primary: &str,
        cause: RouterError,
        request: &PromptRequest,
        snapshot: &[ModelDescriptor],
        registry: &AdapterRegistry,
        normalization: &NormalizationEngine,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<ChunkStream, RouterError> {
        if !self.enabled {
            return Err(cause);
        }
        if self.degraded_for(request) {
            log::info!("degraded mode active, skipping fallback ladder for {}", primary);
            return Ok(self.degraded_stream());
        }

        let mut last_error = cause;
        for candidate in self.ladder(primary, snapshot) {
            let attempt_key = format!("{}->{}", primary, candidate.id);
            if self.bump(&attempt_key, ATTEMPT_ALERT_THRESHOLD) {
                log::warn!("fallback alert: {} crossed {} attempts", attempt_key, ATTEMPT_ALERT_THRESHOLD);
            }

            let prompt = normalization.normalize(request, &candidate.id, &candidate.provider);
            let adapter_request = AdapterRequest {
                prompt,
                options: request.options.clone(),
                timeout,
                retry,
            };
            let adapter = registry.resolve(&candidate.id);
            match adapter.generate_completion_stream(&adapter_request).await {
                Ok(stream) => {
                    log::info!("streaming fallback from {} to {} succeeded", primary, candidate.id);
                    return Ok(stream);
                }
                Err(err) => {
                    let failed_key = format!("{}->{}-failed", primary, candidate.id);
                    if self.record_failed(&failed_key) {
                        log::warn!(
                            "fallback alert: {} crossed {} failures",
                            failed_key,
                            FAILED_ALERT_THRESHOLD
                        );
                    }
                    log::warn!(
                        "streaming fallback from {} to {} failed: {}",
                        primary,
                        candidate.id,
                        err
                    );
                    last_error = err;
                }
            }
        }

        if self.degraded_for(request) {
            return Ok(self.degraded_stream());
        }
        Err(RouterError::AllModelsFailed {
            primary: primary.to_string(),
            cause: Box::new(last_error),
        })
    }
}
