//! Tracing spans for authorization checks.
//!
//! Each call through the engine produces one span carrying the check's
//! source and type, finished with the decision, cache status, and latency.
//! Spans are inert when no subscriber is installed.

use cerberus_core::ResourceContext;
use tracing::{field::Empty, Span};

/// A span wrapping a single authorization check.
///
/// # Example
///
/// ```
/// use cerberus_telemetry::AuthSpan;
///
/// let span = AuthSpan::start("guard", "policy", Some("webapp.GET.documents"), None);
/// // ... perform the check ...
/// span.finish(true, false, 3.2, None);
/// ```
#[derive(Debug)]
pub struct AuthSpan {
    span: Span,
}

impl AuthSpan {
    /// Starts a span for an authorization check.
    #[must_use]
    pub fn start(
        source: &str,
        check_type: &str,
        policy_path: Option<&str>,
        identity: Option<&str>,
    ) -> Self {
        let span = tracing::info_span!(
            "cerberus.authorization",
            source = %source,
            check_type = %check_type,
            policy_path = policy_path,
            identity = identity,
            decision = Empty,
            cached = Empty,
            latency_ms = Empty,
            resource_context = Empty,
        );
        Self { span }
    }

    /// Returns the underlying tracing span.
    #[must_use]
    pub fn inner(&self) -> &Span {
        &self.span
    }

    /// Records an error on the span.
    pub fn record_error(&self, error: &dyn std::error::Error) {
        self.span.record("decision", "error");
        self.span
            .in_scope(|| tracing::error!(error = %error, "authorization check failed"));
    }

    /// Finishes the span with the check outcome.
    pub fn finish(
        self,
        allowed: bool,
        cached: bool,
        latency_ms: f64,
        resource_context: Option<&ResourceContext>,
    ) {
        self.span
            .record("decision", if allowed { "allowed" } else { "denied" });
        self.span.record("cached", cached);
        self.span.record("latency_ms", latency_ms);
        if let Some(ctx) = resource_context {
            self.span
                .record("resource_context", ctx.canonical().as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_lifecycle_without_subscriber() {
        // All operations must be safe with no subscriber installed
        let span = AuthSpan::start("manual", "rebac", Some("webapp.check"), Some("subject:u1"));
        let mut ctx = ResourceContext::new();
        ctx.insert("object_type", "document");
        span.finish(false, true, 0.4, Some(&ctx));
    }

    #[test]
    fn test_record_error() {
        let span = AuthSpan::start("guard", "policy", None, None);
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        span.record_error(&err);
    }
}
