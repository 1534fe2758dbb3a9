//! Cerberus Telemetry - observability sinks for authorization decisions.
//!
//! This crate holds everything the decision pipeline reports into but never
//! depends on for correctness:
//!
//! - [`audit`] - structured JSON audit events for compliance and security
//!   monitoring
//! - [`metrics`] - Prometheus counters, gauges, and histograms via the
//!   `metrics` facade
//! - [`spans`] - one tracing span per authorization check
//! - [`logging`] - `tracing-subscriber` initialization (JSON or pretty)
//!
//! All sinks are zero-overhead when unconfigured: the `metrics` macros are
//! no-ops without an installed recorder, spans are disabled without a
//! subscriber, and the audit logger is an `Option` at the call sites.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod spans;

pub use audit::{AuditEvent, AuditLevel, AuditLogger, AuditSink};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, LogConfig};
pub use spans::AuthSpan;
