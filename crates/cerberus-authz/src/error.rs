//! Error types for the authorization pipeline.

use thiserror::Error;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Errors that can occur while obtaining an authorization decision.
///
/// Denials are not errors: a `false` decision is an ordinary return value.
/// These variants cover infrastructure and configuration failures only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The authorizer could not be reached.
    #[error("authorizer connection failed: {0}")]
    Connect(String),

    /// The authorizer call timed out.
    #[error("authorizer call timed out: {0}")]
    Timeout(String),

    /// A lower-level transport failure (I/O, protocol).
    #[error("transport error: {0}")]
    Transport(String),

    /// The authorizer answered with a non-success HTTP status.
    #[error("authorizer returned status {status}: {message}")]
    Status {
        /// HTTP status code returned by the authorizer.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Waiting for a pooled connection exceeded the acquire timeout.
    #[error("connection pool exhausted: waited {waited_ms}ms for a connection")]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The authorizer response could not be decoded.
    #[error("malformed authorizer response: {0}")]
    Decode(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A custom fallback decider failed.
    #[error("fallback decider error: {0}")]
    Fallback(String),
}

impl AuthzError {
    /// Creates a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short label for this error, used in metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PoolClosed => "pool_closed",
            Self::Config(_) => "config",
            Self::Decode(_) => "decode",
            Self::Json(_) => "json",
            Self::Fallback(_) => "fallback",
            _ => "other",
        }
    }

    /// Whether this error is a transient infrastructure failure.
    ///
    /// Transient failures are the ones the circuit breaker counts toward
    /// tripping by default; configuration and decode errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Timeout(_)
                | Self::Transport(_)
                | Self::PoolExhausted { .. }
        )
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
