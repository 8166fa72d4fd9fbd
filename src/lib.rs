// src/lib.rs

// Import the top-level `promptroute` module.
pub mod promptroute;

// Re-export the submodules at the crate root so callers don't have to
// navigate the whole hierarchy.
pub use promptroute::{
    adapter, adapters, cache, circuit_breaker, classifier, config, error, fallback, metrics,
    normalizer, pipeline, request, response, retry, routing, server, store,
};

// Re-exporting key items for easier external access.
pub use promptroute::adapter::ProviderAdapter;
pub use promptroute::classifier::{Classification, Classifier};
pub use promptroute::error::RouterError;
pub use promptroute::pipeline::{Pipeline, RouterHandle};
pub use promptroute::request::{Message, PromptRequest};
pub use promptroute::response::{NormalizedResponse, StreamingChunk, TokenUsage};

/// Initialise the process-wide logger.
///
/// Safe to call more than once; only the first call installs the logger.
/// Honors `RUST_LOG` the usual `env_logger` way.
pub fn init_logger() {
    let _ = env_logger::builder().format_timestamp_millis().try_init();
}
