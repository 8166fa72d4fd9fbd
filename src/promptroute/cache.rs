//! Result cache.
//!
//! Successful non-streaming responses are cached in the shared store under a
//! SHA-256 fingerprint of the cache-relevant request fields. The strategy
//! mode decides read/write behavior, and the TTL shrinks for prompts the
//! classifier judged simple — cheap answers age out faster.
//!
//! Cache failures are soft: an unreachable store reads as a miss and writes
//! are fire-and-forget.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::promptroute::classifier::{Classification, Complexity};
use crate::promptroute::request::GenerationOptions;
use crate::promptroute::response::NormalizedResponse;
use crate::promptroute::store::SharedStore;

/// Key namespace shared with other router deployments on the same store.
pub const CACHE_KEY_PREFIX: &str = "router:";

/// Prompts shorter than this never get written under the `minimal` strategy.
const MIN_CACHEABLE_PROMPT_LEN: usize = 20;

/// Cache behavior modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    Default,
    Aggressive,
    Minimal,
    None,
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Ok(CacheStrategy::Default),
            "aggressive" => Ok(CacheStrategy::Aggressive),
            "minimal" => Ok(CacheStrategy::Minimal),
            "none" => Ok(CacheStrategy::None),
            other => Err(format!("unknown cache strategy: {}", other)),
        }
    }
}

/// SHA-256 hex fingerprint over
/// `content|modelId|maxTokens|temperature|tools|toolChoice`.
pub fn fingerprint(content: &str, model_id: &str, options: &GenerationOptions) -> String {
    let tools = if options.tools.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&options.tools).unwrap_or_default()
    };
    let tool_choice = options
        .tool_choice
        .as_ref()
        .map(|c| c.fingerprint_token())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(b"|");
    hasher.update(model_id.as_bytes());
    hasher.update(b"|");
    hasher.update(
        options
            .max_tokens
            .map(|m| m.to_string())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(
        options
            .temperature
            .map(|t| t.to_string())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(tools.as_bytes());
    hasher.update(b"|");
    hasher.update(tool_choice.as_bytes());

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Shared-store backed response cache.
pub struct ResponseCache {
    store: Arc<dyn SharedStore>,
    strategy: CacheStrategy,
    base_ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn SharedStore>, strategy: CacheStrategy, base_ttl: Duration) -> Self {
        ResponseCache {
            store,
            strategy,
            base_ttl,
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    fn key(fingerprint: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, fingerprint)
    }

    /// TTL for one entry: the base (or per-request override), halved when
    /// the classification reads simple.
    fn ttl_for(
        &self,
        classification: Option<&Classification>,
        override_secs: Option<u64>,
    ) -> Duration {
        let base = override_secs
            .map(Duration::from_secs)
            .unwrap_or(self.base_ttl);
        match classification {
            Some(c) if c.complexity == Complexity::Simple => base / 2,
            _ => base,
        }
    }

    /// Read before dispatch. Always a miss under the `none` strategy.
    pub async fn lookup(&self, fingerprint: &str) -> Option<NormalizedResponse> {
        if self.strategy == CacheStrategy::None {
            return None;
        }
        let key = Self::key(fingerprint);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("cache read failed for {}: {}", key, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(response) => Some(response),
            Err(err) => {
                log::warn!("dropping malformed cache entry {}: {}", key, err);
                let _ = self.store.delete(&key).await;
                None
            }
        }
    }

    /// Write after a successful dispatch. Only non-cached, non-streaming
    /// responses land here; the `minimal` strategy additionally skips very
    /// short prompts.
    pub async fn record(
        &self,
        fingerprint: &str,
        prompt_len: usize,
        response: &NormalizedResponse,
        ttl_override_secs: Option<u64>,
    ) {
        if self.strategy == CacheStrategy::None || response.cached {
            return;
        }
        if self.strategy == CacheStrategy::Minimal && prompt_len < MIN_CACHEABLE_PROMPT_LEN {
            return;
        }

        let ttl = self.ttl_for(response.classification.as_ref(), ttl_override_secs);
        let key = Self::key(fingerprint);
        let raw = match serde_json::to_string(response) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("failed to serialize cache entry {}: {}", key, err);
                return;
            }
        };
        if let Err(err) = self.store.put(&key, raw, ttl).await {
            log::warn!("cache write failed for {}: {}", key, err);
        }
    }
}
