//! Provider adapters and the adapter registry.
//!
//! The registry maps a model id to the adapter that speaks its provider's
//! protocol. Provider inference runs on prefix/substring rules; unknown ids
//! fall back to the OpenAI adapter, which covers the long tail of
//! OpenAI-compatible deployments. Instances are memoized process-wide so
//! every request for a model shares one latency window and credential slot.

pub mod anthropic;
pub mod common;
pub mod lmstudio;
pub mod openai;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::promptroute::adapter::{AdapterDetails, ProviderAdapter};
use crate::promptroute::circuit_breaker::CircuitBreaker;
use crate::promptroute::config::ProviderSettings;
use crate::promptroute::store::SharedStore;

use self::anthropic::AnthropicAdapter;
use self::lmstudio::LmStudioAdapter;
use self::openai::OpenAIAdapter;

/// Infer the provider tag for a model id.
pub fn infer_provider(model_id: &str) -> &'static str {
    let lower = model_id.to_ascii_lowercase();
    if lower.starts_with("gpt") || lower.contains("openai") {
        "openai"
    } else if lower.starts_with("claude") || lower.contains("anthropic") {
        "anthropic"
    } else if lower.contains("lmstudio") || lower.starts_with("local") {
        "lmstudio"
    } else {
        "openai"
    }
}

/// Process-wide adapter factory and cache.
pub struct AdapterRegistry {
    store: Arc<dyn SharedStore>,
    settings: ProviderSettings,
    instances: Mutex<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl AdapterRegistry {
    pub fn new(store: Arc<dyn SharedStore>, settings: ProviderSettings) -> Self {
        AdapterRegistry {
            store,
            settings,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The adapter for a model id, created on first use and cached.
    pub fn resolve(&self, model_id: &str) -> Arc<dyn ProviderAdapter> {
        let mut instances = self.instances.lock().unwrap();
        if let Some(adapter) = instances.get(model_id) {
            return adapter.clone();
        }

        let breaker = CircuitBreaker::new(self.store.clone());
        let adapter: Arc<dyn ProviderAdapter> = match infer_provider(model_id) {
            "anthropic" => Arc::new(AnthropicAdapter::new(
                model_id,
                &self.settings.anthropic_base_url,
                breaker,
            )),
            "lmstudio" => Arc::new(LmStudioAdapter::new(
                model_id,
                &self.settings.lmstudio_base_url,
                breaker,
            )),
            _ => Arc::new(OpenAIAdapter::new(
                model_id,
                &self.settings.openai_base_url,
                breaker,
            )),
        };
        instances.insert(model_id.to_string(), adapter.clone());
        adapter
    }

    /// Register a prebuilt adapter under its model id, replacing any cached
    /// instance. Lets hosts (and tests) plug in custom backends.
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let mut instances = self.instances.lock().unwrap();
        instances.insert(adapter.model_id().to_string(), adapter);
    }

    /// Drop every memoized instance.
    pub fn clear(&self) {
        self.instances.lock().unwrap().clear();
    }

    /// Introspection snapshot of every cached adapter.
    pub fn snapshot(&self) -> Vec<AdapterDetails> {
        let instances = self.instances.lock().unwrap();
        let mut details: Vec<AdapterDetails> =
            instances.values().map(|a| a.details()).collect();
        details.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        details
    }
}
