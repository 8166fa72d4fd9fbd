//! LM Studio local adapter built on the OpenAI-compatible transport.
//!
//! Local deployments expose the Chat Completions surface, so this wrapper
//! delegates the wire protocol to [`OpenAIAdapter`] and only changes the
//! endpoint, the provider tag, and the credential rules (local servers run
//! without real keys).

use async_trait::async_trait;

use crate::promptroute::adapter::{AdapterRequest, LatencyWindow, ProviderAdapter};
use crate::promptroute::adapters::openai::OpenAIAdapter;
use crate::promptroute::circuit_breaker::CircuitBreaker;
use crate::promptroute::error::RouterError;
use crate::promptroute::response::{ChunkStream, NormalizedResponse};

/// Client for a local LM Studio (or compatible) server.
pub struct LmStudioAdapter {
    /// Delegated adapter that handles the HTTP interactions.
    delegate: OpenAIAdapter,
}

impl LmStudioAdapter {
    pub fn new(model_id: &str, base_url: &str, breaker: CircuitBreaker) -> Self {
        LmStudioAdapter {
            // We reuse the OpenAI wire protocol and delegate the calls to it.
            delegate: OpenAIAdapter::with_provider(
                model_id,
                base_url,
                "lmstudio",
                "LMSTUDIO_API_KEY",
                Some("lm-studio"),
                breaker,
            ),
        }
    }
}

#[async_trait]
impl ProviderAdapter for LmStudioAdapter {
    fn model_id(&self) -> &str {
        self.delegate.model_id()
    }

    fn provider(&self) -> &str {
        "lmstudio"
    }

    fn capabilities(&self) -> &[String] {
        self.delegate.capabilities()
    }

    fn latency(&self) -> &LatencyWindow {
        self.delegate.latency()
    }

    async fn is_available(&self) -> bool {
        // Local servers accept any key, so availability never hinges on one.
        true
    }

    async fn generate_completion(
        &self,
        request: &AdapterRequest,
    ) -> Result<NormalizedResponse, RouterError> {
        self.delegate.generate_completion(request).await
    }

    async fn generate_completion_stream(
        &self,
        request: &AdapterRequest,
    ) -> Result<ChunkStream, RouterError> {
        self.delegate.generate_completion_stream(request).await
    }
}
