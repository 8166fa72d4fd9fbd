//! Configuration for the router.
//!
//! Provides the [`RouterConfig`] struct for routing biases, fallback and
//! cache behavior, and provider endpoints. Users construct it manually or
//! pull it from the environment with [`RouterConfig::from_env`] — no
//! config-file parsing dependencies are introduced. Provider credentials are
//! *not* held here; adapters read them lazily from the environment on first
//! use.

use crate::promptroute::cache::CacheStrategy;

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Provider endpoints. Credentials come from `OPENAI_API_KEY`,
/// `ANTHROPIC_API_KEY`, and `LMSTUDIO_API_KEY` at call time.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub lmstudio_base_url: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            lmstudio_base_url: "http://localhost:1234/v1".to_string(),
        }
    }
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        let defaults = ProviderSettings::default();
        ProviderSettings {
            openai_base_url: env_string("OPENAI_BASE_URL", &defaults.openai_base_url),
            anthropic_base_url: env_string("ANTHROPIC_BASE_URL", &defaults.anthropic_base_url),
            lmstudio_base_url: env_string("LMSTUDIO_BASE_URL", &defaults.lmstudio_base_url),
        }
    }
}

/// Global router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Bias routing toward the cheapest qualifying model.
    pub cost_optimize: bool,
    /// Bias routing toward the highest-quality qualifying model.
    pub quality_optimize: bool,
    /// Bias routing toward the lowest-latency qualifying model.
    pub latency_optimize: bool,
    pub fallback_enabled: bool,
    /// Maximum number of alternative models tried by the fallback ladder.
    pub fallback_levels: usize,
    pub chain_enabled: bool,
    pub cache_strategy: CacheStrategy,
    /// Base cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Per-attempt unary timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub monitor_fallbacks: bool,
    pub degraded_mode: bool,
    pub auto_degraded_mode: bool,
    pub providers: ProviderSettings,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            cost_optimize: false,
            quality_optimize: false,
            latency_optimize: false,
            fallback_enabled: true,
            fallback_levels: 2,
            chain_enabled: false,
            cache_strategy: CacheStrategy::Default,
            cache_ttl_secs: 300,
            request_timeout_ms: 30_000,
            monitor_fallbacks: true,
            degraded_mode: false,
            auto_degraded_mode: false,
            providers: ProviderSettings::default(),
        }
    }
}

impl RouterConfig {
    /// Read the recognized environment options, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = RouterConfig::default();
        RouterConfig {
            cost_optimize: env_bool("COST_OPTIMIZE", defaults.cost_optimize),
            quality_optimize: env_bool("QUALITY_OPTIMIZE", defaults.quality_optimize),
            latency_optimize: env_bool("LATENCY_OPTIMIZE", defaults.latency_optimize),
            fallback_enabled: env_bool("FALLBACK_ENABLED", defaults.fallback_enabled),
            fallback_levels: env_u64("FALLBACK_LEVELS", defaults.fallback_levels as u64) as usize,
            chain_enabled: env_bool("CHAIN_ENABLED", defaults.chain_enabled),
            cache_strategy: std::env::var("CACHE_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_strategy),
            cache_ttl_secs: env_u64("REDIS_CACHE_TTL", defaults.cache_ttl_secs),
            request_timeout_ms: env_u64("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            monitor_fallbacks: env_bool("MONITOR_FALLBACKS", defaults.monitor_fallbacks),
            degraded_mode: env_bool("DEGRADED_MODE", defaults.degraded_mode),
            auto_degraded_mode: env_bool("AUTO_DEGRADED_MODE", defaults.auto_degraded_mode),
            providers: ProviderSettings::from_env(),
        }
    }

    /// The default routing strategy name implied by the optimize flags.
    /// Quality wins over cost wins over latency when several are set.
    pub fn default_strategy(&self) -> &'static str {
        if self.quality_optimize {
            "best-model"
        } else if self.cost_optimize {
            "lowest-cost"
        } else if self.latency_optimize {
            "lowest-latency"
        } else {
            "best-model"
        }
    }
}
