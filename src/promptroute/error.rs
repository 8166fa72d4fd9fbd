//! Error taxonomy for the request router.
//!
//! Provider failures are classified into a small set of [`ProviderErrorKind`]s
//! at the adapter boundary, then surfaced as [`RouterError`] variants that
//! carry provider/model context. Retryability is a property of the kind:
//! only rate limits and transient upstream failures are retried.

use thiserror::Error;

/// Classified failure kind reported by a provider adapter.
///
/// The kind decides both retry behavior and whether the per-model circuit
/// breaker trips. Derived from HTTP status codes and provider error bodies in
/// [`crate::promptroute::adapters::common::classify_http`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// HTTP 401/403 or an auth-typed error body.
    Authentication,
    /// HTTP 429 or a rate-limit error body.
    RateLimit,
    /// HTTP 5xx, or a network/timeout failure.
    ServerError,
    /// The provider refused the request for content-policy reasons.
    ContentFiltered,
    /// The provider account has exhausted its quota.
    QuotaExceeded,
    /// Anything the classifier did not recognize.
    Unknown,
}

impl ProviderErrorKind {
    /// Whether an attempt that failed with this kind may be retried.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::RateLimit | ProviderErrorKind::ServerError
        )
    }

    /// Whether a failure of this kind trips a closed circuit open.
    pub fn trips_circuit(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Authentication
                | ProviderErrorKind::QuotaExceeded
                | ProviderErrorKind::ContentFiltered
        )
    }

    /// Stable wire code, used in terminal streaming error chunks.
    pub fn code(self) -> &'static str {
        match self {
            ProviderErrorKind::Authentication => "AUTHENTICATION",
            ProviderErrorKind::RateLimit => "RATE_LIMIT",
            ProviderErrorKind::ServerError => "SERVER_ERROR",
            ProviderErrorKind::ContentFiltered => "CONTENT_FILTERED",
            ProviderErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ProviderErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// Every failure the router can hand back to a caller.
///
/// Variants mirror the user-visible error envelope: [`RouterError::code`]
/// yields the stable `code` string and the HTTP layer adds the `request_id`.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Client input rejected before the pipeline ran.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        reason: String,
    },

    /// Missing or rejected provider credential.
    #[error("authentication rejected by {provider} for model {model}: {detail}")]
    ModelAuthentication {
        provider: String,
        model: String,
        detail: String,
    },

    /// The provider is throttling us.
    #[error("rate limited by {provider} for model {model}: {detail}")]
    ModelRateLimit {
        provider: String,
        model: String,
        detail: String,
    },

    /// Transient upstream failure (5xx, network error, timeout).
    #[error("upstream failure from {provider} for model {model}: {detail}")]
    ModelServerError {
        provider: String,
        model: String,
        detail: String,
    },

    /// The provider refused the request for content-policy reasons.
    #[error("content filtered by {provider} for model {model}: {detail}")]
    ModelContentFiltered {
        provider: String,
        model: String,
        detail: String,
    },

    /// The provider account quota is used up.
    #[error("quota exceeded on {provider} for model {model}: {detail}")]
    ModelQuotaExceeded {
        provider: String,
        model: String,
        detail: String,
    },

    /// Provider failure that matched none of the known shapes.
    #[error("unclassified provider failure from {provider} for model {model}: {detail}")]
    ModelUnknown {
        provider: String,
        model: String,
        detail: String,
    },

    /// The circuit for the model is open, or its descriptor is unavailable.
    #[error("model {model} is unavailable ({state})")]
    ModelUnavailable {
        model: String,
        state: String,
    },

    /// The fallback ladder was exhausted without a successful response.
    #[error("all models failed for primary {primary}: {cause}")]
    AllModelsFailed {
        primary: String,
        #[source]
        cause: Box<RouterError>,
    },

    /// Pipeline-level wrapper naming the step that failed.
    #[error("request processing failed during {stage}: {cause}")]
    RequestProcessingFailed {
        stage: String,
        #[source]
        cause: Box<RouterError>,
    },
}

impl RouterError {
    /// Build the matching variant for a classified provider failure.
    pub fn from_kind(
        kind: ProviderErrorKind,
        provider: &str,
        model: &str,
        detail: impl Into<String>,
    ) -> Self {
        let provider = provider.to_string();
        let model = model.to_string();
        let detail = detail.into();
        match kind {
            ProviderErrorKind::Authentication => RouterError::ModelAuthentication {
                provider,
                model,
                detail,
            },
            ProviderErrorKind::RateLimit => RouterError::ModelRateLimit {
                provider,
                model,
                detail,
            },
            ProviderErrorKind::ServerError => RouterError::ModelServerError {
                provider,
                model,
                detail,
            },
            ProviderErrorKind::ContentFiltered => RouterError::ModelContentFiltered {
                provider,
                model,
                detail,
            },
            ProviderErrorKind::QuotaExceeded => RouterError::ModelQuotaExceeded {
                provider,
                model,
                detail,
            },
            ProviderErrorKind::Unknown => RouterError::ModelUnknown {
                provider,
                model,
                detail,
            },
        }
    }

    /// The classified kind, for errors that came from a provider attempt.
    pub fn kind(&self) -> Option<ProviderErrorKind> {
        match self {
            RouterError::ModelAuthentication { .. } => Some(ProviderErrorKind::Authentication),
            RouterError::ModelRateLimit { .. } => Some(ProviderErrorKind::RateLimit),
            RouterError::ModelServerError { .. } => Some(ProviderErrorKind::ServerError),
            RouterError::ModelContentFiltered { .. } => Some(ProviderErrorKind::ContentFiltered),
            RouterError::ModelQuotaExceeded { .. } => Some(ProviderErrorKind::QuotaExceeded),
            RouterError::ModelUnknown { .. } => Some(ProviderErrorKind::Unknown),
            _ => None,
        }
    }

    /// Whether the adapter retry loop may try again after this error.
    pub fn retryable(&self) -> bool {
        self.kind().map(|k| k.retryable()).unwrap_or(false)
    }

    /// Stable error code for the user-visible envelope.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::InvalidRequest { .. } => "INVALID_REQUEST",
            RouterError::ModelAuthentication { .. } => "MODEL_AUTHENTICATION",
            RouterError::ModelRateLimit { .. } => "MODEL_RATE_LIMIT",
            RouterError::ModelServerError { .. } => "MODEL_SERVER_ERROR",
            RouterError::ModelContentFiltered { .. } => "MODEL_CONTENT_FILTERED",
            RouterError::ModelQuotaExceeded { .. } => "MODEL_QUOTA_EXCEEDED",
            RouterError::ModelUnknown { .. } => "MODEL_UNKNOWN",
            RouterError::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            RouterError::AllModelsFailed { .. } => "ALL_MODELS_FAILED",
            RouterError::RequestProcessingFailed { .. } => "REQUEST_PROCESSING_FAILED",
        }
    }

    /// Provider tag, when the error carries one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            RouterError::ModelAuthentication { provider, .. }
            | RouterError::ModelRateLimit { provider, .. }
            | RouterError::ModelServerError { provider, .. }
            | RouterError::ModelContentFiltered { provider, .. }
            | RouterError::ModelQuotaExceeded { provider, .. }
            | RouterError::ModelUnknown { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Model id, when the error carries one.
    pub fn model(&self) -> Option<&str> {
        match self {
            RouterError::ModelAuthentication { model, .. }
            | RouterError::ModelRateLimit { model, .. }
            | RouterError::ModelServerError { model, .. }
            | RouterError::ModelContentFiltered { model, .. }
            | RouterError::ModelQuotaExceeded { model, .. }
            | RouterError::ModelUnknown { model, .. }
            | RouterError::ModelUnavailable { model, .. } => Some(model),
            RouterError::AllModelsFailed { primary, .. } => Some(primary),
            _ => None,
        }
    }
}
