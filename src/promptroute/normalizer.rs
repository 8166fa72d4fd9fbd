//! Prompt normalization.
//!
//! Before dispatch, the pipeline rewrites the neutral request into the shape
//! the chosen provider expects: message-based providers get a full message
//! list, plain-text providers get a single string. Normalizers are selected
//! by model id / provider tag; normalization is pure and deterministic per
//! input.

use std::sync::Arc;

use crate::promptroute::request::{Message, PromptRequest};

/// The provider-suitable form of a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedPrompt {
    /// A single plain string, for completion-style providers.
    Text(String),
    /// An ordered message list, for chat-style providers.
    Messages(Vec<Message>),
}

impl NormalizedPrompt {
    /// Canonical text used for cache fingerprints and token estimates.
    pub fn content_text(&self) -> String {
        match self {
            NormalizedPrompt::Text(text) => text.clone(),
            NormalizedPrompt::Messages(messages) => messages
                .iter()
                .map(|m| m.content_text())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One registered normalization rule.
pub trait PromptNormalizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this normalizer handles the given model.
    fn matches(&self, model_id: &str, provider: &str) -> bool;

    fn normalize(&self, request: &PromptRequest) -> NormalizedPrompt;
}

/// Normalizer for chat-style providers: passes an existing message list
/// through untouched and wraps a raw prompt in a single user message.
pub struct MessageListNormalizer;

impl PromptNormalizer for MessageListNormalizer {
    fn name(&self) -> &'static str {
        "message-list"
    }

    fn matches(&self, _model_id: &str, provider: &str) -> bool {
        matches!(provider, "openai" | "anthropic" | "lmstudio")
    }

    fn normalize(&self, request: &PromptRequest) -> NormalizedPrompt {
        match &request.messages {
            Some(messages) => NormalizedPrompt::Messages(messages.clone()),
            None => NormalizedPrompt::Messages(vec![Message::user(request.prompt.clone())]),
        }
    }
}

/// Normalizer for completion-style models: flattens everything to one
/// string, keeping message order.
///
/// Selected by model id: legacy completion deployments (`text-*`) and
/// instruction-tuned local models (`*instruct*`) take a single prompt
/// string rather than a chat message list.
pub struct PlainTextNormalizer;

impl PromptNormalizer for PlainTextNormalizer {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn matches(&self, model_id: &str, _provider: &str) -> bool {
        let lower = model_id.to_ascii_lowercase();
        lower.starts_with("text-") || lower.contains("instruct")
    }

    fn normalize(&self, request: &PromptRequest) -> NormalizedPrompt {
        match &request.messages {
            Some(messages) => NormalizedPrompt::Text(
                messages
                    .iter()
                    .map(|m| m.content_text())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
            None => NormalizedPrompt::Text(request.prompt.clone()),
        }
    }
}

/// Registry of normalizers with a default fallback.
pub struct NormalizationEngine {
    normalizers: Vec<Arc<dyn PromptNormalizer>>,
    default: Arc<dyn PromptNormalizer>,
}

impl NormalizationEngine {
    /// Engine with the stock normalizers registered. The completion-style
    /// rule runs before the general chat rule so `text-*` ids are not
    /// swallowed by their provider's message-list match.
    pub fn new() -> Self {
        NormalizationEngine {
            normalizers: vec![
                Arc::new(PlainTextNormalizer),
                Arc::new(MessageListNormalizer),
            ],
            default: Arc::new(MessageListNormalizer),
        }
    }

    /// Register an additional normalizer, checked before the stock ones.
    pub fn register(&mut self, normalizer: Arc<dyn PromptNormalizer>) {
        self.normalizers.insert(0, normalizer);
    }

    /// Rewrite the request for the chosen model.
    pub fn normalize(
        &self,
        request: &PromptRequest,
        model_id: &str,
        provider: &str,
    ) -> NormalizedPrompt {
        let normalizer = self
            .normalizers
            .iter()
            .find(|n| n.matches(model_id, provider))
            .unwrap_or(&self.default);
        normalizer.normalize(request)
    }
}

impl Default for NormalizationEngine {
    fn default() -> Self {
        NormalizationEngine::new()
    }
}
