//! Error types for the telemetry crate.

use thiserror::Error;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors that can occur when initializing telemetry subsystems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// Logging initialization failed.
    #[error("logging initialization failed: {0}")]
    LoggingInit(String),

    /// Metrics initialization failed.
    #[error("metrics initialization failed: {0}")]
    MetricsInit(String),

    /// An address string could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
