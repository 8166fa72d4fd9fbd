//! Provider-neutral request types.
//!
//! A [`PromptRequest`] is immutable for the lifetime of one pipeline pass: it
//! carries the raw prompt (or an ordered message list), generation options,
//! and per-request overrides for routing, classification, timeout, and retry
//! behavior. Adapters translate the neutral [`GenerationOptions`] into their
//! provider wire format.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::promptroute::classifier::ClassifierOptions;
use crate::promptroute::routing::RoutingOptions;

/// A single chat message in the provider-neutral shape.
///
/// The tagged `role` matches the OpenAI wire vocabulary; `function` and
/// `tool` messages carry the correlation fields their providers require.
/// Content may be null on the wire (assistant tool-call messages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        #[serde(default)]
        content: Option<String>,
    },
    User {
        #[serde(default)]
        content: Option<String>,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function_call: Option<FunctionCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Function {
        name: String,
        #[serde(default)]
        content: Option<String>,
    },
    Tool {
        tool_call_id: String,
        #[serde(default)]
        content: Option<String>,
    },
}

impl Message {
    /// Convenience constructor for a plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: Some(content.into()),
        }
    }

    /// Convenience constructor for a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: Some(content.into()),
        }
    }

    /// Convenience constructor for a plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            function_call: None,
            tool_calls: None,
        }
    }

    /// The text content of the message, empty when null.
    pub fn content_text(&self) -> &str {
        let content = match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Function { content, .. }
            | Message::Tool { content, .. } => content,
        };
        content.as_deref().unwrap_or("")
    }
}

/// Legacy single-function call payload on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the provider produced it.
    pub arguments: String,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, e.g. `"call_abc123"`.
    pub id: String,
    /// Target tool name.
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// Provider-agnostic tool schema forwarded with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters: serde_json::Value,
}

/// Tool-selection policy.
///
/// Serialises to the OpenAI wire shape: the mode strings `"auto"`, `"none"`,
/// `"required"`, or a `{"type":"function","function":{"name":…}}` object for
/// a named tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

impl ToolChoice {
    /// Wire value in the OpenAI vocabulary.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            ToolChoice::Auto => serde_json::Value::String("auto".to_string()),
            ToolChoice::None => serde_json::Value::String("none".to_string()),
            ToolChoice::Required => serde_json::Value::String("required".to_string()),
            ToolChoice::Named(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }

    /// Canonical token used in cache fingerprints.
    pub fn fingerprint_token(&self) -> String {
        match self {
            ToolChoice::Auto => "auto".to_string(),
            ToolChoice::None => "none".to_string(),
            ToolChoice::Required => "required".to_string(),
            ToolChoice::Named(name) => format!("named:{}", name),
        }
    }
}

impl Serialize for ToolChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ToolChoice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::String(s) => match s.as_str() {
                "auto" => Ok(ToolChoice::Auto),
                "none" => Ok(ToolChoice::None),
                "required" | "any" => Ok(ToolChoice::Required),
                other => Err(D::Error::custom(format!(
                    "unknown tool_choice mode: {}",
                    other
                ))),
            },
            serde_json::Value::Object(_) => {
                let name = value
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .or_else(|| value.get("name"))
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| D::Error::custom("tool_choice object without function name"))?;
                Ok(ToolChoice::Named(name.to_string()))
            }
            _ => Err(D::Error::custom("tool_choice must be a string or object")),
        }
    }
}

/// Neutral generation options every adapter understands.
///
/// Each adapter maps these onto its provider fields; unset options are
/// omitted from the wire request so the provider applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Extended-thinking token budget for providers that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget_tokens: Option<u32>,
}

/// One routed request, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    /// Raw prompt text. Ignored when `messages` is set.
    pub prompt: String,
    /// Ordered message list, used instead of `prompt` when present.
    pub messages: Option<Vec<Message>>,
    /// Explicit model id; bypasses routing when the model is available.
    pub model_id: Option<String>,
    /// Neutral generation options.
    pub options: GenerationOptions,
    /// Whether the caller wants a chunked streaming response.
    pub stream: bool,
    /// Per-request routing overrides.
    pub routing: RoutingOptions,
    /// Per-request classifier overrides.
    pub classifier: ClassifierOptions,
    /// Unary call timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retry budget override.
    pub max_retries: Option<u32>,
    /// Cache TTL override in seconds.
    pub cache_ttl_secs: Option<u64>,
}

impl PromptRequest {
    /// A plain text request with everything else defaulted.
    pub fn new(prompt: impl Into<String>) -> Self {
        PromptRequest {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// A message-list request with everything else defaulted.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        PromptRequest {
            messages: Some(messages),
            ..Default::default()
        }
    }

    /// The request content as one string, for classification and cache
    /// fingerprints. Message lists concatenate their text content in order.
    pub fn content_text(&self) -> String {
        match &self.messages {
            Some(messages) => messages
                .iter()
                .map(|m| m.content_text())
                .collect::<Vec<_>>()
                .join("\n"),
            None => self.prompt.clone(),
        }
    }

    /// True when the request carries no usable text at all.
    pub fn is_empty(&self) -> bool {
        match &self.messages {
            Some(messages) => messages.iter().all(|m| m.content_text().trim().is_empty()),
            None => self.prompt.trim().is_empty(),
        }
    }
}
