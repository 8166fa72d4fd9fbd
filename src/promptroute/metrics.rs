//! Process-local request metrics for the `/metrics` endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
struct LatencySummary {
    count: u64,
    total_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

/// Counters and per-model latency summaries.
///
/// Everything here is process-local; circuit states come from the shared
/// store at scrape time and are not tracked here.
#[derive(Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    streaming_requests: AtomicU64,
    chain_requests: AtomicU64,
    fallback_attempts: AtomicU64,
    degraded_responses: AtomicU64,
    latencies: Mutex<HashMap<String, LatencySummary>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_streaming_request(&self) {
        self.streaming_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chain_request(&self) {
        self.chain_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_attempt(&self) {
        self.fallback_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_response(&self) {
        self.degraded_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one observed generation latency into the per-model summary.
    pub fn record_latency(&self, model_id: &str, millis: u64) {
        let mut latencies = self.latencies.lock().unwrap();
        let summary = latencies.entry(model_id.to_string()).or_default();
        if summary.count == 0 {
            summary.min_ms = millis;
            summary.max_ms = millis;
        } else {
            summary.min_ms = summary.min_ms.min(millis);
            summary.max_ms = summary.max_ms.max(millis);
        }
        summary.count += 1;
        summary.total_ms += millis;
    }

    /// JSON snapshot for the metrics endpoint.
    pub fn snapshot(&self) -> serde_json::Value {
        let latencies = self.latencies.lock().unwrap();
        let mut per_model = serde_json::Map::new();
        for (model, summary) in latencies.iter() {
            let average = if summary.count > 0 {
                summary.total_ms as f64 / summary.count as f64
            } else {
                0.0
            };
            per_model.insert(
                model.clone(),
                serde_json::json!({
                    "count": summary.count,
                    "average_ms": average,
                    "min_ms": summary.min_ms,
                    "max_ms": summary.max_ms,
                }),
            );
        }

        serde_json::json!({
            "requests_total": self.requests_total.load(Ordering::Relaxed),
            "successes": self.successes.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "cache_misses": self.cache_misses.load(Ordering::Relaxed),
            "streaming_requests": self.streaming_requests.load(Ordering::Relaxed),
            "chain_requests": self.chain_requests.load(Ordering::Relaxed),
            "fallback_attempts": self.fallback_attempts.load(Ordering::Relaxed),
            "degraded_responses": self.degraded_responses.load(Ordering::Relaxed),
            "model_latency": per_model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_summary_tracks_extremes() {
        let metrics = Metrics::new();
        metrics.record_latency("gpt-4o", 100);
        metrics.record_latency("gpt-4o", 300);
        metrics.record_latency("gpt-4o", 200);
        let snapshot = metrics.snapshot();
        let summary = &snapshot["model_latency"]["gpt-4o"];
        assert_eq!(summary["count"], 3);
        assert_eq!(summary["average_ms"], 200.0);
        assert_eq!(summary["min_ms"], 100);
        assert_eq!(summary["max_ms"], 300);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["requests_total"], 2);
        assert_eq!(snapshot["cache_hits"], 1);
        assert_eq!(snapshot["failures"], 0);
    }
}
