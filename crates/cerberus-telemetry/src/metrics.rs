//! Prometheus metrics for authorization decisions.
//!
//! Uses the `metrics` facade, so every recording function is a no-op until
//! a recorder is installed (see [`init_metrics`]).
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `cerberus_auth_requests_total` | Counter | `source`, `decision`, `check_type` |
//! | `cerberus_cache_hits_total` | Counter | `source` |
//! | `cerberus_cache_misses_total` | Counter | `source` |
//! | `cerberus_errors_total` | Counter | `error_type` |
//! | `cerberus_circuit_transitions_total` | Counter | `from_state`, `to_state` |
//! | `cerberus_fallback_total` | Counter | `trigger`, `cache_hit`, `decision` |
//! | `cerberus_circuit_state` | Gauge | - |
//! | `cerberus_cache_size` | Gauge | - |
//! | `cerberus_auth_latency_seconds` | Histogram | `source`, `cached` |
//! | `cerberus_authorizer_latency_seconds` | Histogram | - |

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{TelemetryError, TelemetryResult};

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Initializes the metrics subsystem and starts the Prometheus exporter.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the recorder cannot be
/// installed, or `TelemetryError::InvalidAddress` for a bad listen address.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers descriptions for all standard metrics.
fn register_metric_descriptions() {
    describe_counter!(
        "cerberus_auth_requests_total",
        "Total authorization requests by source, decision, and check type"
    );
    describe_counter!("cerberus_cache_hits_total", "Decision cache hits");
    describe_counter!("cerberus_cache_misses_total", "Decision cache misses");
    describe_counter!("cerberus_errors_total", "Authorization errors by type");
    describe_counter!(
        "cerberus_circuit_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!("cerberus_fallback_total", "Circuit breaker fallback decisions");

    describe_gauge!(
        "cerberus_circuit_state",
        "Current circuit state (0=closed, 1=open, 2=half_open)"
    );
    describe_gauge!("cerberus_cache_size", "Current number of cached decisions");

    describe_histogram!(
        "cerberus_auth_latency_seconds",
        "End-to-end authorization check latency"
    );
    describe_histogram!(
        "cerberus_authorizer_latency_seconds",
        "Latency of the remote authorizer call alone"
    );
}

/// Records an authorization request outcome.
pub fn record_auth_request(source: &str, allowed: bool, check_type: &str) {
    counter!(
        "cerberus_auth_requests_total",
        "source" => source.to_string(),
        "decision" => if allowed { "allowed" } else { "denied" },
        "check_type" => check_type.to_string()
    )
    .increment(1);
}

/// Records a decision cache hit.
pub fn record_cache_hit(source: &str) {
    counter!("cerberus_cache_hits_total", "source" => source.to_string()).increment(1);
}

/// Records a decision cache miss.
pub fn record_cache_miss(source: &str) {
    counter!("cerberus_cache_misses_total", "source" => source.to_string()).increment(1);
}

/// Records end-to-end authorization latency.
pub fn record_latency(duration: Duration, source: &str, cached: bool) {
    histogram!(
        "cerberus_auth_latency_seconds",
        "source" => source.to_string(),
        "cached" => cached.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records the latency of the remote authorizer call alone.
pub fn record_authorizer_latency(duration: Duration) {
    histogram!("cerberus_authorizer_latency_seconds").record(duration.as_secs_f64());
}

/// Records an authorization error by type.
pub fn record_error(error_type: &str) {
    counter!("cerberus_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Sets the circuit breaker state gauge (0=closed, 1=open, 2=half_open).
pub fn set_circuit_state(state: u8) {
    gauge!("cerberus_circuit_state").set(f64::from(state));
}

/// Records a circuit breaker state transition.
pub fn record_circuit_transition(from_state: &str, to_state: &str) {
    counter!(
        "cerberus_circuit_transitions_total",
        "from_state" => from_state.to_string(),
        "to_state" => to_state.to_string()
    )
    .increment(1);
}

/// Records a circuit breaker fallback decision.
pub fn record_fallback(trigger: &str, cache_hit: bool, allowed: bool) {
    counter!(
        "cerberus_fallback_total",
        "trigger" => trigger.to_string(),
        "cache_hit" => cache_hit.to_string(),
        "decision" => if allowed { "allowed" } else { "denied" }
    )
    .increment(1);
}

/// Sets the decision cache size gauge.
pub fn set_cache_size(size: usize) {
    gauge!("cerberus_cache_size").set(size as f64);
}
