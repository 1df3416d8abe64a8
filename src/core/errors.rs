//! Custom error types for gateway operations

use thiserror::Error;

/// Gateway errors. Every variant is terminal for the current request.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No valid session
    #[error("Unauthorized")]
    Unauthenticated,

    /// Local rate limiter rejected the request
    #[error("Too many requests. Please try again later.")]
    QuotaExceeded {
        limit: u32,
        remaining: u32,
        /// Unix timestamp (ms) when a slot frees up
        reset_at: u64,
    },

    /// Requested model needs the caller's own API key
    #[error("Model '{model}' requires your own Gemini API key. Add one in Settings to use it.")]
    ModelNotAllowed {
        model: String,
    },

    /// The model provider reported exhausted quota
    #[error("API quota exceeded. Please try again later or upgrade your plan.")]
    UpstreamQuotaExhausted,

    /// The model stream carried a structured error
    #[error("{message}")]
    UpstreamStreamError {
        message: String,
    },

    /// Stream completed without any text
    #[error("No content generated (likely API quota limit)")]
    EmptyResult,

    /// Ownership check failed
    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
    },

    /// Entity does not exist
    #[error("{entity} not found")]
    NotFound {
        entity: &'static str,
    },

    /// Request payload rejected
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
    },

    /// Upstream call exceeded the configured timeout
    #[error("Upstream request timed out after {timeout_ms} ms")]
    UpstreamTimeout {
        timeout_ms: u64,
    },

    /// Upstream HTTP failure
    #[error("Upstream error: {status} - {message}")]
    Upstream {
        status: u16,
        message: String,
    },

    /// Credential encryption/decryption failure
    #[error("Crypto error: {message}")]
    Crypto {
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Persistence collaborator failure
    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Redis error
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

impl GatewayError {
    /// HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated => 401,
            GatewayError::QuotaExceeded { .. } | GatewayError::UpstreamQuotaExhausted => 429,
            GatewayError::ModelNotAllowed { .. } | GatewayError::Forbidden { .. } => 403,
            GatewayError::NotFound { .. } => 404,
            GatewayError::InvalidInput { .. } => 400,
            GatewayError::UpstreamTimeout { .. } => 504,
            _ => 500,
        }
    }

    /// Shorthand for an ownership failure.
    pub fn forbidden(message: impl Into<String>) -> Self {
        GatewayError::Forbidden {
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure.
    pub fn invalid(message: impl Into<String>) -> Self {
        GatewayError::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether an upstream error message signals provider-side exhaustion.
    pub fn is_quota_message(message: &str) -> bool {
        message.contains("quota") || message.contains("RESOURCE_EXHAUSTED")
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::InternalError(err.to_string())
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
