//! Model routing.
//!
//! The routing engine turns a classification plus per-request options into a
//! concrete model choice, using pluggable strategies registered by name.
//! Strategies work purely on the in-memory descriptor table — they never
//! make network calls.
//!
//! The descriptor table itself lives in a [`ModelCatalog`]: a wholesale-
//! swapped snapshot that background tasks reload every fifteen minutes and
//! probe for availability every five.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::promptroute::adapters::AdapterRegistry;
use crate::promptroute::classifier::{Classification, PromptType};

/// One routable model as the routing engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
    pub capabilities: BTreeSet<String>,
    /// Dollars per 1k tokens; `None` for free (local) models.
    #[serde(default)]
    pub cost_per_1k_tokens: Option<f64>,
    /// Quality score in `[0, 1]`.
    pub quality: f64,
    pub context_window: usize,
    /// Latency estimate in milliseconds, refreshed from rolling averages.
    pub latency_ms: u64,
    pub available: bool,
    /// Tie-break rank; higher wins.
    pub priority: i32,
}

impl ModelDescriptor {
    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    fn effective_cost(&self) -> f64 {
        self.cost_per_1k_tokens.unwrap_or(0.0)
    }
}

/// Where the catalog gets its descriptor table from.
///
/// Production deployments back this with their configuration service; the
/// bundled [`StaticDescriptorSource`] serves a fixed table.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn load(&self) -> Vec<ModelDescriptor>;
}

/// Fixed descriptor table.
pub struct StaticDescriptorSource {
    models: Vec<ModelDescriptor>,
}

impl StaticDescriptorSource {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        StaticDescriptorSource { models }
    }
}

#[async_trait]
impl DescriptorSource for StaticDescriptorSource {
    async fn load(&self) -> Vec<ModelDescriptor> {
        self.models.clone()
    }
}

fn caps(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|c| c.to_string()).collect()
}

/// The stock descriptor table used when no source is wired up.
pub fn default_descriptors() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            capabilities: caps(&["chat", "code-generation", "tool-use", "streaming"]),
            cost_per_1k_tokens: Some(0.01),
            quality: 0.9,
            context_window: 128_000,
            latency_ms: 1_200,
            available: true,
            priority: 80,
        },
        ModelDescriptor {
            id: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            capabilities: caps(&["chat", "code-generation", "tool-use", "streaming"]),
            cost_per_1k_tokens: Some(0.0006),
            quality: 0.75,
            context_window: 128_000,
            latency_ms: 600,
            available: true,
            priority: 70,
        },
        ModelDescriptor {
            id: "gpt-4".to_string(),
            provider: "openai".to_string(),
            capabilities: caps(&["chat", "code-generation", "tool-use"]),
            cost_per_1k_tokens: Some(0.03),
            quality: 0.85,
            context_window: 8_192,
            latency_ms: 2_000,
            available: true,
            priority: 60,
        },
        ModelDescriptor {
            id: "claude-sonnet-4-0".to_string(),
            provider: "anthropic".to_string(),
            capabilities: caps(&[
                "chat",
                "code-generation",
                "reasoning",
                "creative-writing",
                "tool-use",
                "streaming",
            ]),
            cost_per_1k_tokens: Some(0.009),
            quality: 0.92,
            context_window: 200_000,
            latency_ms: 1_500,
            available: true,
            priority: 75,
        },
        ModelDescriptor {
            id: "claude-haiku-3-5".to_string(),
            provider: "anthropic".to_string(),
            capabilities: caps(&["chat", "creative-writing", "tool-use", "streaming"]),
            cost_per_1k_tokens: Some(0.0024),
            quality: 0.7,
            context_window: 200_000,
            latency_ms: 500,
            available: true,
            priority: 65,
        },
        ModelDescriptor {
            id: "lmstudio-local".to_string(),
            provider: "lmstudio".to_string(),
            capabilities: caps(&["chat", "streaming"]),
            cost_per_1k_tokens: None,
            quality: 0.5,
            context_window: 8_192,
            latency_ms: 900,
            available: true,
            priority: 20,
        },
    ]
}

/// Wholesale-swapped descriptor table.
///
/// Readers always observe a complete snapshot, never a partial update.
pub struct ModelCatalog {
    source: Arc<dyn DescriptorSource>,
    models: RwLock<Arc<Vec<ModelDescriptor>>>,
}

impl ModelCatalog {
    /// Catalog over a dynamic source; starts empty until the first reload.
    pub fn new(source: Arc<dyn DescriptorSource>) -> Self {
        ModelCatalog {
            source,
            models: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Catalog over a fixed table, loaded immediately.
    pub fn with_static(models: Vec<ModelDescriptor>) -> Self {
        ModelCatalog {
            source: Arc::new(StaticDescriptorSource::new(models.clone())),
            models: RwLock::new(Arc::new(models)),
        }
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> Arc<Vec<ModelDescriptor>> {
        self.models.read().await.clone()
    }

    pub async fn get(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.snapshot()
            .await
            .iter()
            .find(|m| m.id == model_id)
            .cloned()
    }

    /// Reload the table from the source and swap it in wholesale.
    pub async fn reload(&self) {
        let fresh = self.source.load().await;
        *self.models.write().await = Arc::new(fresh);
    }

    async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Vec<ModelDescriptor>),
    {
        let mut guard = self.models.write().await;
        let mut fresh = guard.as_ref().clone();
        mutate(&mut fresh);
        *guard = Arc::new(fresh);
    }

    pub async fn set_availability(&self, model_id: &str, available: bool) {
        self.update(|models| {
            if let Some(model) = models.iter_mut().find(|m| m.id == model_id) {
                model.available = available;
            }
        })
        .await;
    }

    /// Fold an observed rolling-average latency back into the descriptor.
    pub async fn record_latency(&self, model_id: &str, average_ms: u64) {
        self.update(|models| {
            if let Some(model) = models.iter_mut().find(|m| m.id == model_id) {
                model.latency_ms = average_ms;
            }
        })
        .await;
    }

    /// Ask each model's adapter whether it is currently usable and fold the
    /// answers into the table.
    pub async fn probe_availability(&self, registry: &AdapterRegistry) {
        let snapshot = self.snapshot().await;
        let mut availability = Vec::with_capacity(snapshot.len());
        for model in snapshot.iter() {
            let adapter = registry.resolve(&model.id);
            availability.push((model.id.clone(), adapter.is_available().await));
        }
        self.update(|models| {
            for (id, available) in availability {
                if let Some(model) = models.iter_mut().find(|m| m.id == id) {
                    model.available = available;
                }
            }
        })
        .await;
    }

    /// Background reload every fifteen minutes.
    pub fn spawn_refresh(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let catalog = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(15 * 60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                catalog.reload().await;
                log::debug!("model catalog reloaded");
            }
        })
    }

    /// Background availability probe every five minutes.
    pub fn spawn_availability_probe(
        self: Arc<Self>,
        registry: Arc<AdapterRegistry>,
    ) -> tokio::task::JoinHandle<()> {
        let catalog = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5 * 60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                catalog.probe_availability(&registry).await;
            }
        })
    }
}

/// Per-request routing overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutingOptions {
    /// Strategy name; the engine default applies when unset.
    pub strategy: Option<String>,
    pub max_latency_ms: Option<u64>,
    pub max_cost_per_1k_tokens: Option<f64>,
    pub prefer_free: bool,
    /// Require the context window to fit the estimated prompt.
    pub context_aware: bool,
    pub excluded_models: Vec<String>,
    /// Category-based overrides: prompt type name → model id.
    pub category_map: Option<BTreeMap<String, String>>,
    /// Per-request degraded-mode override for the fallback controller.
    pub degraded_mode: Option<bool>,
}

/// A pluggable model-selection strategy. Pure: no I/O, no network.
pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick a model id from the candidate descriptors, or `None` when no
    /// candidate qualifies under this strategy.
    fn select(
        &self,
        classification: &Classification,
        candidates: &[&ModelDescriptor],
        options: &RoutingOptions,
    ) -> Option<String>;
}

/// Tie-break: descriptor priority descending, then lexicographic id.
fn tie_break<'a>(a: &'a ModelDescriptor, b: &'a ModelDescriptor) -> std::cmp::Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
}

/// The capability a prompt type wants from its model, when it has an
/// opinion.
fn capability_for(prompt_type: PromptType) -> Option<&'static str> {
    match prompt_type {
        PromptType::Code => Some("code-generation"),
        PromptType::Creative => Some("creative-writing"),
        PromptType::Analytical | PromptType::Mathematical => Some("reasoning"),
        _ => None,
    }
}

/// Smallest rolling-average latency that meets `max_latency_ms`.
pub struct LowestLatencyStrategy;

impl RoutingStrategy for LowestLatencyStrategy {
    fn name(&self) -> &'static str {
        "lowest-latency"
    }

    fn select(
        &self,
        _classification: &Classification,
        candidates: &[&ModelDescriptor],
        options: &RoutingOptions,
    ) -> Option<String> {
        let mut qualifying: Vec<&ModelDescriptor> = candidates
            .iter()
            .copied()
            .filter(|m| match options.max_latency_ms {
                Some(limit) => m.latency_ms <= limit,
                None => true,
            })
            .collect();
        qualifying.sort_by(|a, b| a.latency_ms.cmp(&b.latency_ms).then_with(|| tie_break(*a, *b)));
        qualifying.first().map(|m| m.id.clone())
    }
}

/// Cheapest model whose cost fits the ceiling; free models first when asked.
pub struct LowestCostStrategy;

impl RoutingStrategy for LowestCostStrategy {
    fn name(&self) -> &'static str {
        "lowest-cost"
    }

    fn select(
        &self,
        _classification: &Classification,
        candidates: &[&ModelDescriptor],
        options: &RoutingOptions,
    ) -> Option<String> {
        let mut qualifying: Vec<&ModelDescriptor> = candidates
            .iter()
            .copied()
            .filter(|m| match options.max_cost_per_1k_tokens {
                Some(limit) => m.effective_cost() <= limit,
                None => true,
            })
            .collect();

        if options.prefer_free && qualifying.iter().any(|m| m.cost_per_1k_tokens.is_none()) {
            qualifying.retain(|m| m.cost_per_1k_tokens.is_none());
        }

        qualifying.sort_by(|a, b| {
            a.effective_cost()
                .partial_cmp(&b.effective_cost())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_break(*a, *b))
        });
        qualifying.first().map(|m| m.id.clone())
    }
}

/// Highest quality, constrained by the classification's capability wish and
/// (when context-aware) the estimated prompt size.
pub struct BestModelStrategy;

impl RoutingStrategy for BestModelStrategy {
    fn name(&self) -> &'static str {
        "best-model"
    }

    fn select(
        &self,
        classification: &Classification,
        candidates: &[&ModelDescriptor],
        options: &RoutingOptions,
    ) -> Option<String> {
        let mut qualifying: Vec<&ModelDescriptor> = candidates
            .iter()
            .copied()
            .filter(|m| {
                !options.context_aware
                    || m.context_window >= classification.estimated_prompt_tokens
            })
            .collect();

        // Prefer models that advertise the capability the prompt type wants,
        // but only when at least one candidate has it.
        if let Some(capability) = capability_for(classification.prompt_type) {
            if qualifying.iter().any(|m| m.has_capability(capability)) {
                qualifying.retain(|m| m.has_capability(capability));
            }
        }

        qualifying.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_break(*a, *b))
        });
        qualifying.first().map(|m| m.id.clone())
    }
}

/// Classification-type lookup table.
pub struct CategoryStrategy {
    map: BTreeMap<String, String>,
}

impl CategoryStrategy {
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        map.insert("code".to_string(), "gpt-4o".to_string());
        map.insert("creative".to_string(), "claude-sonnet-4-0".to_string());
        map.insert("analytical".to_string(), "claude-sonnet-4-0".to_string());
        map.insert("mathematical".to_string(), "claude-sonnet-4-0".to_string());
        map.insert("factual".to_string(), "gpt-4o-mini".to_string());
        map.insert("conversational".to_string(), "gpt-4o-mini".to_string());
        CategoryStrategy { map }
    }

    pub fn with_map(map: BTreeMap<String, String>) -> Self {
        CategoryStrategy { map }
    }
}

impl Default for CategoryStrategy {
    fn default() -> Self {
        CategoryStrategy::new()
    }
}

impl RoutingStrategy for CategoryStrategy {
    fn name(&self) -> &'static str {
        "category-based"
    }

    fn select(
        &self,
        classification: &Classification,
        candidates: &[&ModelDescriptor],
        options: &RoutingOptions,
    ) -> Option<String> {
        let type_name = classification.prompt_type.as_str();
        let target = options
            .category_map
            .as_ref()
            .and_then(|map| map.get(type_name))
            .or_else(|| self.map.get(type_name))?;
        candidates
            .iter()
            .find(|m| &m.id == target)
            .map(|m| m.id.clone())
    }
}

/// Strategy registry with a default and a fallback.
pub struct RoutingEngine {
    strategies: HashMap<String, Arc<dyn RoutingStrategy>>,
    default_strategy: String,
    fallback_strategy: String,
}

impl RoutingEngine {
    /// Engine with the four stock strategies registered.
    pub fn new(default_strategy: &str) -> Self {
        let mut engine = RoutingEngine {
            strategies: HashMap::new(),
            default_strategy: default_strategy.to_string(),
            fallback_strategy: "best-model".to_string(),
        };
        engine.register(Arc::new(LowestLatencyStrategy));
        engine.register(Arc::new(LowestCostStrategy));
        engine.register(Arc::new(BestModelStrategy));
        engine.register(Arc::new(CategoryStrategy::new()));
        engine
    }

    pub fn register(&mut self, strategy: Arc<dyn RoutingStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn set_fallback_strategy(&mut self, name: &str) {
        self.fallback_strategy = name.to_string();
    }

    /// Choose a model for the classification, or `None` when no available
    /// candidate qualifies under either the chosen or the fallback strategy.
    pub fn route(
        &self,
        classification: &Classification,
        models: &[ModelDescriptor],
        options: &RoutingOptions,
    ) -> Option<String> {
        let candidates: Vec<&ModelDescriptor> = models
            .iter()
            .filter(|m| m.available && !options.excluded_models.contains(&m.id))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let requested = options
            .strategy
            .as_deref()
            .unwrap_or(&self.default_strategy);

        if let Some(strategy) = self.strategies.get(requested) {
            if let Some(choice) = strategy.select(classification, &candidates, options) {
                return Some(choice);
            }
        } else {
            log::warn!("unknown routing strategy {:?}, using fallback", requested);
        }

        if requested != self.fallback_strategy {
            if let Some(strategy) = self.strategies.get(&self.fallback_strategy) {
                return strategy.select(classification, &candidates, options);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promptroute::classifier::{Complexity, Priority};

    fn classification(prompt_type: PromptType) -> Classification {
        Classification {
            prompt_type,
            complexity: Complexity::Medium,
            features: BTreeSet::new(),
            priority: Priority::Medium,
            confidence: 0.8,
            estimated_prompt_tokens: 50,
            estimated_completion_tokens: 100,
            domain: None,
            language: None,
        }
    }

    #[test]
    fn best_model_honors_capability_wish() {
        let engine = RoutingEngine::new("best-model");
        let models = default_descriptors();
        let choice = engine
            .route(
                &classification(PromptType::Code),
                &models,
                &RoutingOptions::default(),
            )
            .unwrap();
        // Highest-quality available model advertising code-generation.
        assert_eq!(choice, "claude-sonnet-4-0");
    }

    #[test]
    fn lowest_cost_prefers_free_when_asked() {
        let engine = RoutingEngine::new("lowest-cost");
        let models = default_descriptors();
        let options = RoutingOptions {
            prefer_free: true,
            ..Default::default()
        };
        let choice = engine
            .route(&classification(PromptType::General), &models, &options)
            .unwrap();
        assert_eq!(choice, "lmstudio-local");
    }

    #[test]
    fn lowest_latency_respects_ceiling_then_falls_back() {
        let engine = RoutingEngine::new("lowest-latency");
        let models = default_descriptors();
        let options = RoutingOptions {
            max_latency_ms: Some(550),
            ..Default::default()
        };
        let choice = engine
            .route(&classification(PromptType::General), &models, &options)
            .unwrap();
        assert_eq!(choice, "claude-haiku-3-5");

        // Nothing under 10ms: the engine falls back to best-model.
        let options = RoutingOptions {
            max_latency_ms: Some(10),
            ..Default::default()
        };
        let choice = engine
            .route(&classification(PromptType::General), &models, &options)
            .unwrap();
        assert_eq!(choice, "claude-sonnet-4-0");
    }

    #[test]
    fn excluded_and_unavailable_models_are_filtered() {
        let engine = RoutingEngine::new("best-model");
        let mut models = default_descriptors();
        models
            .iter_mut()
            .find(|m| m.id == "claude-sonnet-4-0")
            .unwrap()
            .available = false;
        let options = RoutingOptions {
            excluded_models: vec!["gpt-4o".to_string()],
            ..Default::default()
        };
        let choice = engine
            .route(&classification(PromptType::Code), &models, &options)
            .unwrap();
        assert_eq!(choice, "gpt-4");
    }

    #[test]
    fn category_strategy_uses_map_then_falls_back() {
        let engine = RoutingEngine::new("category-based");
        let models = default_descriptors();
        let choice = engine
            .route(
                &classification(PromptType::Factual),
                &models,
                &RoutingOptions::default(),
            )
            .unwrap();
        assert_eq!(choice, "gpt-4o-mini");

        // Mapped target unavailable: the engine falls back to best-model.
        let mut models = default_descriptors();
        models
            .iter_mut()
            .find(|m| m.id == "gpt-4o-mini")
            .unwrap()
            .available = false;
        let choice = engine
            .route(
                &classification(PromptType::Factual),
                &models,
                &RoutingOptions::default(),
            )
            .unwrap();
        assert_ne!(choice, "gpt-4o-mini");
    }

    #[test]
    fn context_aware_filters_small_windows() {
        let engine = RoutingEngine::new("best-model");
        let models = default_descriptors();
        let mut classification = classification(PromptType::General);
        classification.estimated_prompt_tokens = 50_000;
        let options = RoutingOptions {
            context_aware: true,
            ..Default::default()
        };
        let choice = engine.route(&classification, &models, &options).unwrap();
        // gpt-4 (8k) and lmstudio-local (8k) are out.
        assert!(choice == "claude-sonnet-4-0" || choice.starts_with("gpt-4o"));
    }

    #[tokio::test]
    async fn catalog_swaps_snapshots_wholesale() {
        let catalog = ModelCatalog::with_static(default_descriptors());
        let before = catalog.snapshot().await;
        catalog.set_availability("gpt-4o", false).await;
        let after = catalog.snapshot().await;
        // The old snapshot is untouched; the new one reflects the change.
        assert!(before.iter().find(|m| m.id == "gpt-4o").unwrap().available);
        assert!(!after.iter().find(|m| m.id == "gpt-4o").unwrap().available);
    }

    #[tokio::test]
    async fn catalog_latency_updates_land_in_descriptors() {
        let catalog = ModelCatalog::with_static(default_descriptors());
        catalog.record_latency("gpt-4o", 321).await;
        assert_eq!(catalog.get("gpt-4o").await.unwrap().latency_ms, 321);
    }
}
