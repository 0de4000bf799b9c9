//! Error types for Aid Assist.

use std::time::Duration;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Failures reported by an external collaborator (classifier, index, web
/// search, drafting, tone review).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or rejected credentials, or a missing guidelines document.
    #[error("{gateway} is not configured: {reason}")]
    Configuration { gateway: String, reason: String },

    /// A required input was empty or malformed.
    #[error("Invalid input to {gateway}: {reason}")]
    InvalidInput { gateway: String, reason: String },

    /// Network, timeout or upstream failure.
    #[error("{gateway} transport failure: {reason}")]
    Transport { gateway: String, reason: String },

    /// The collaborator answered, but not with something we can use.
    #[error("Invalid response from {gateway}: {reason}")]
    InvalidResponse { gateway: String, reason: String },
}

impl GatewayError {
    /// Map an LLM failure onto the gateway taxonomy. Rejected credentials are
    /// a configuration problem; everything else is transport.
    pub fn from_llm(gateway: &str, err: LlmError) -> Self {
        match err {
            LlmError::AuthFailed { provider } => Self::Configuration {
                gateway: gateway.to_string(),
                reason: format!("credentials rejected by {provider}"),
            },
            LlmError::InvalidResponse { reason, .. } => Self::InvalidResponse {
                gateway: gateway.to_string(),
                reason,
            },
            other => Self::Transport {
                gateway: gateway.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Whether the failure is a configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// A classification that breaks its own invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationError {
    #[error("needs_clarification requires at least one clarification option")]
    MissingClarificationOptions,
}

impl From<ClassificationError> for GatewayError {
    fn from(err: ClassificationError) -> Self {
        Self::InvalidResponse {
            gateway: "classifier".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Turn-level failures. None of these produce a final answer.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Empty message")]
    EmptyMessage,

    #[error("Classification failed: {0}")]
    Classification(#[source] GatewayError),

    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] GatewayError),

    #[error("Web fallback failed: {0}")]
    WebFallback(#[source] GatewayError),

    #[error("Drafting failed: {0}")]
    Drafting(#[source] GatewayError),

    #[error("Turn in state {from} cannot transition to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
