//! Per-model circuit breaker.
//!
//! A three-state gate (`closed` / `open` / `half-open`) keyed by
//! `circuit_breaker:<provider>:<model>` with a distinct `:stream` variant,
//! persisted in the shared store so every process sees the same state. The
//! `half-open` state is computed on the read side from the trip timestamp;
//! no background job is involved.
//!
//! The breaker is best-effort: if the store is unreachable the state reads
//! as `closed` and calls proceed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::promptroute::error::ProviderErrorKind;
use crate::promptroute::store::SharedStore;

/// Seconds an open record survives in the shared store.
const OPEN_TTL_SECS: u64 = 60;

/// Seconds after tripping before the gate lets one probe call through.
const HALF_OPEN_AFTER_SECS: i64 = 30;

/// Circuit state as observed at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

/// Wire record stored under the circuit key.
#[derive(Debug, Serialize, Deserialize)]
struct CircuitRecord {
    status: CircuitStatus,
    /// Unix seconds at which the circuit tripped.
    timestamp: i64,
}

/// Shared-store backed circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn SharedStore>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        CircuitBreaker { store }
    }

    /// Shared-store key for a model's circuit, with the `:stream` variant.
    pub fn key(provider: &str, model: &str, stream: bool) -> String {
        if stream {
            format!("circuit_breaker:{}:{}:stream", provider, model)
        } else {
            format!("circuit_breaker:{}:{}", provider, model)
        }
    }

    /// Read the circuit state, promoting stale `open` records to
    /// `half-open`. Store failures read as `closed`.
    pub async fn probe(&self, provider: &str, model: &str, stream: bool) -> CircuitStatus {
        let key = Self::key(provider, model, stream);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CircuitStatus::Closed,
            Err(err) => {
                log::warn!("circuit breaker store read failed for {}: {}", key, err);
                return CircuitStatus::Closed;
            }
        };

        let record: CircuitRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("dropping malformed circuit record for {}: {}", key, err);
                let _ = self.store.delete(&key).await;
                return CircuitStatus::Closed;
            }
        };

        match record.status {
            CircuitStatus::Open => {
                let elapsed = chrono::Utc::now().timestamp() - record.timestamp;
                if elapsed > HALF_OPEN_AFTER_SECS {
                    CircuitStatus::HalfOpen
                } else {
                    CircuitStatus::Open
                }
            }
            other => other,
        }
    }

    /// Record a successful call: any existing record is cleared, returning
    /// the circuit to `closed`.
    pub async fn on_success(&self, provider: &str, model: &str, stream: bool) {
        let key = Self::key(provider, model, stream);
        if let Err(err) = self.store.delete(&key).await {
            log::warn!("circuit breaker store delete failed for {}: {}", key, err);
        }
    }

    /// Record a failed call.
    ///
    /// Trips the circuit when the failure kind is fatal
    /// (authentication / quota / content policy), or when the call went
    /// through a `half-open` gate — any failure there re-opens.
    pub async fn on_failure(
        &self,
        provider: &str,
        model: &str,
        stream: bool,
        kind: ProviderErrorKind,
        observed: CircuitStatus,
    ) {
        let should_trip = kind.trips_circuit() || observed == CircuitStatus::HalfOpen;
        if !should_trip {
            return;
        }
        let key = Self::key(provider, model, stream);
        let record = CircuitRecord {
            status: CircuitStatus::Open,
            timestamp: chrono::Utc::now().timestamp(),
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        if let Err(err) = self
            .store
            .put(&key, raw, Duration::from_secs(OPEN_TTL_SECS))
            .await
        {
            log::warn!("circuit breaker store write failed for {}: {}", key, err);
        } else if log::log_enabled!(log::Level::Warn) {
            log::warn!(
                "circuit opened for {}:{}{} after {:?} failure",
                provider,
                model,
                if stream { " (stream)" } else { "" },
                kind
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promptroute::store::{MemoryStore, UnreachableStore};

    #[tokio::test]
    async fn auth_failure_trips_closed_circuit() {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(store);
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::Closed
        );
        breaker
            .on_failure(
                "openai",
                "gpt-4o",
                false,
                ProviderErrorKind::Authentication,
                CircuitStatus::Closed,
            )
            .await;
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::Open
        );
    }

    #[tokio::test]
    async fn rate_limit_does_not_trip_closed_circuit() {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(store);
        breaker
            .on_failure(
                "openai",
                "gpt-4o",
                false,
                ProviderErrorKind::RateLimit,
                CircuitStatus::Closed,
            )
            .await;
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::Closed
        );
    }

    #[tokio::test]
    async fn stale_open_record_reads_half_open() {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(store.clone());
        let record = serde_json::json!({
            "status": "open",
            "timestamp": chrono::Utc::now().timestamp() - 31,
        });
        store
            .put(
                &CircuitBreaker::key("openai", "gpt-4o", false),
                record.to_string(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::HalfOpen
        );
    }

    #[tokio::test]
    async fn success_resets_half_open_to_closed() {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(store.clone());
        breaker
            .on_failure(
                "openai",
                "gpt-4o",
                false,
                ProviderErrorKind::Authentication,
                CircuitStatus::Closed,
            )
            .await;
        breaker.on_success("openai", "gpt-4o", false).await;
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::Closed
        );
    }

    #[tokio::test]
    async fn any_failure_in_half_open_reopens() {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(store);
        breaker
            .on_failure(
                "openai",
                "gpt-4o",
                false,
                ProviderErrorKind::ServerError,
                CircuitStatus::HalfOpen,
            )
            .await;
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::Open
        );
    }

    #[tokio::test]
    async fn unreachable_store_reads_closed() {
        let breaker = CircuitBreaker::new(Arc::new(UnreachableStore));
        assert_eq!(
            breaker.probe("openai", "gpt-4o", false).await,
            CircuitStatus::Closed
        );
    }

    #[test]
    fn stream_variant_has_distinct_key() {
        assert_eq!(
            CircuitBreaker::key("openai", "gpt-4o", false),
            "circuit_breaker:openai:gpt-4o"
        );
        assert_eq!(
            CircuitBreaker::key("openai", "gpt-4o", true),
            "circuit_breaker:openai:gpt-4o:stream"
        );
    }
}
