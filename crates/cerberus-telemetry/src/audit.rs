//! Audit logging for authorization decisions.
//!
//! Emits one structured JSON event per decision for compliance, security
//! monitoring, and debugging. Events go to a custom [`AuditSink`] when one
//! is configured, otherwise to the `cerberus::audit` tracing target at the
//! level configured for the event kind.

use std::collections::BTreeMap;

use cerberus_core::{AuthRequest, BoxFuture, Identity, ResourceContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Severity attached to an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    /// Debug-level event.
    Debug,
    /// Informational event.
    Info,
    /// Warning event.
    Warn,
    /// Error event.
    Error,
}

/// Identity block of an audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditIdentity {
    /// Identity kind as a string (`none`, `manual`, `subject`).
    pub kind: String,
    /// Identity value, if one was present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Whether the request was effectively anonymous.
    pub anonymous: bool,
}

impl From<&Identity> for AuditIdentity {
    fn from(identity: &Identity) -> Self {
        let kind = match identity {
            Identity::None => "none",
            Identity::Manual(_) => "manual",
            Identity::Subject(_) => "subject",
        };
        Self {
            kind: kind.to_string(),
            value: identity.value().map(String::from),
            anonymous: identity.is_anonymous(),
        }
    }
}

/// Structured audit event for authorization decisions.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event name, e.g. `authorization.middleware.denied`.
    pub event: String,
    /// Event timestamp (UTC, RFC 3339).
    pub timestamp: DateTime<Utc>,
    /// Event severity.
    pub level: AuditLevel,
    /// Correlation id for the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Where the check originated: `middleware`, `guard`, or `manual`.
    pub source: String,

    /// Identity block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<AuditIdentity>,

    /// Policy path that was evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<String>,
    /// Decision outcome: `allowed` or `denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Check type: `policy`, `rebac`, or `rebac_batch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    /// Whether the decision came from the cache.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    /// End-to-end latency of the check in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,

    /// HTTP method of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Matched route pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_pattern: Option<String>,
    /// Client IP, taken from forwarding headers when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// ReBAC object type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// ReBAC object id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// ReBAC relation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// ReBAC subject type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,

    /// Reason for the event (e.g. `missing_identity`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Per-relation results for batch checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, bool>>,
    /// Resource context, when the logger is configured to include it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_context: Option<ResourceContext>,
}

impl AuditEvent {
    fn base(event: impl Into<String>, level: AuditLevel, source: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            level,
            request_id: None,
            source: source.into(),
            identity: None,
            policy_path: None,
            decision: None,
            check_type: None,
            cached: false,
            latency_ms: None,
            method: None,
            path: None,
            route_pattern: None,
            client_ip: None,
            object_type: None,
            object_id: None,
            relation: None,
            subject_type: None,
            reason: None,
            results: None,
            resource_context: None,
        }
    }

    /// Serializes the event as a single-line JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Custom destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Delivers an event to the sink.
    fn emit<'a>(&'a self, event: &'a AuditEvent) -> BoxFuture<'a, ()>;
}

/// The details of a single decision handed to [`AuditLogger::log_decision`].
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    /// Policy path that was evaluated.
    pub policy_path: String,
    /// Whether the request was allowed.
    pub allowed: bool,
    /// Where the check originated: `middleware`, `guard`, or `manual`.
    pub source: String,
    /// Check type: `policy`, `rebac`, or `rebac_batch`.
    pub check_type: String,
    /// Whether the decision was served from cache.
    pub cached: bool,
    /// End-to-end latency in milliseconds.
    pub latency_ms: Option<f64>,
    /// Caller identity.
    pub identity: Identity,
    /// ReBAC object type, for relation checks.
    pub object_type: Option<String>,
    /// ReBAC object id, for relation checks.
    pub object_id: Option<String>,
    /// ReBAC relation, for relation checks.
    pub relation: Option<String>,
    /// ReBAC subject type, for relation checks.
    pub subject_type: Option<String>,
    /// Resource context sent to the authorizer.
    pub resource_context: Option<ResourceContext>,
}

impl DecisionRecord {
    /// Creates a minimal policy-check record.
    pub fn policy(policy_path: impl Into<String>, allowed: bool, identity: Identity) -> Self {
        Self {
            policy_path: policy_path.into(),
            allowed,
            source: "guard".to_string(),
            check_type: "policy".to_string(),
            cached: false,
            latency_ms: None,
            identity,
            object_type: None,
            object_id: None,
            relation: None,
            subject_type: None,
            resource_context: None,
        }
    }

    /// Sets the check source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the latency.
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Attaches the resource context.
    #[must_use]
    pub fn with_resource_context(mut self, ctx: ResourceContext) -> Self {
        self.resource_context = Some(ctx);
        self
    }
}

/// Audit logger for authorization decisions.
///
/// Which events get logged, and at what level, is configurable per event
/// kind; the defaults match a production posture (allowed at INFO, denied
/// and unauthenticated at WARN, manual checks suppressed).
pub struct AuditLogger {
    /// Log successful authorizations.
    pub log_allowed: bool,
    /// Log denied authorizations.
    pub log_denied: bool,
    /// Log unauthenticated (401) rejections.
    pub log_unauthenticated: bool,
    /// Log manual checks (`is_allowed`, `check_relations`).
    pub log_manual_checks: bool,

    /// Level for allowed events.
    pub level_allowed: AuditLevel,
    /// Level for denied events.
    pub level_denied: AuditLevel,
    /// Level for unauthenticated events.
    pub level_unauthenticated: AuditLevel,

    /// Include the resource context in events.
    pub include_resource_context: bool,

    /// Custom event destination; defaults to the `cerberus::audit` tracing
    /// target.
    pub sink: Option<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("log_allowed", &self.log_allowed)
            .field("log_denied", &self.log_denied)
            .field("log_unauthenticated", &self.log_unauthenticated)
            .field("log_manual_checks", &self.log_manual_checks)
            .field("include_resource_context", &self.include_resource_context)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self {
            log_allowed: true,
            log_denied: true,
            log_unauthenticated: true,
            log_manual_checks: false,
            level_allowed: AuditLevel::Info,
            level_denied: AuditLevel::Warn,
            level_unauthenticated: AuditLevel::Warn,
            include_resource_context: true,
            sink: None,
        }
    }
}

impl AuditLogger {
    /// Creates an audit logger with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a custom sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Gets or generates a correlation id for the request.
    fn request_id(request: Option<&AuthRequest>) -> String {
        if let Some(request) = request {
            for header in ["x-request-id", "x-correlation-id", "request-id"] {
                if let Some(value) = request.header(header) {
                    return value.to_string();
                }
            }
        }
        Uuid::now_v7().simple().to_string()[..8].to_string()
    }

    /// Extracts the client IP from forwarding headers.
    fn client_ip(request: Option<&AuthRequest>) -> Option<String> {
        let request = request?;
        for header in ["x-forwarded-for", "x-real-ip"] {
            if let Some(value) = request.header(header) {
                return Some(value.split(',').next().unwrap_or(value).trim().to_string());
            }
        }
        None
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(&event).await;
            return;
        }
        let json = event.to_json();
        match event.level {
            AuditLevel::Debug => tracing::debug!(target: "cerberus::audit", "{json}"),
            AuditLevel::Info => tracing::info!(target: "cerberus::audit", "{json}"),
            AuditLevel::Warn => tracing::warn!(target: "cerberus::audit", "{json}"),
            AuditLevel::Error => tracing::error!(target: "cerberus::audit", "{json}"),
        }
    }

    /// Logs an authorization decision.
    pub async fn log_decision(&self, request: Option<&AuthRequest>, record: DecisionRecord) {
        if record.allowed && !self.log_allowed {
            return;
        }
        if !record.allowed && !self.log_denied {
            return;
        }

        let decision = if record.allowed { "allowed" } else { "denied" };
        let level = if record.allowed {
            self.level_allowed
        } else {
            self.level_denied
        };

        let mut event = AuditEvent::base(
            format!("authorization.{}.{}", record.source, decision),
            level,
            record.source.clone(),
        );
        event.request_id = Some(Self::request_id(request));
        event.identity = Some(AuditIdentity::from(&record.identity));
        event.policy_path = Some(record.policy_path);
        event.decision = Some(decision.to_string());
        event.check_type = Some(record.check_type);
        event.cached = record.cached;
        event.latency_ms = record.latency_ms.map(|ms| (ms * 100.0).round() / 100.0);
        event.method = request.map(|r| r.method().to_string());
        event.path = request.map(|r| r.path().to_string());
        event.route_pattern = request.and_then(|r| r.route_pattern().map(String::from));
        event.client_ip = Self::client_ip(request);
        event.object_type = record.object_type;
        event.object_id = record.object_id;
        event.relation = record.relation;
        event.subject_type = record.subject_type;
        if self.include_resource_context {
            event.resource_context = record.resource_context;
        }

        self.emit(event).await;
    }

    /// Logs the results of a batch relation check.
    pub async fn log_batch_check(
        &self,
        request: Option<&AuthRequest>,
        object_type: &str,
        object_id: &str,
        results: &BTreeMap<String, bool>,
        latency_ms: Option<f64>,
        identity: &Identity,
    ) {
        if !self.log_manual_checks {
            return;
        }

        let mut event = AuditEvent::base(
            "authorization.check.relations",
            self.level_allowed,
            "manual",
        );
        event.request_id = Some(Self::request_id(request));
        event.identity = Some(AuditIdentity::from(identity));
        event.check_type = Some("rebac_batch".to_string());
        event.latency_ms = latency_ms;
        event.method = request.map(|r| r.method().to_string());
        event.path = request.map(|r| r.path().to_string());
        event.client_ip = Self::client_ip(request);
        event.object_type = Some(object_type.to_string());
        event.object_id = Some(object_id.to_string());
        event.results = Some(results.clone());

        self.emit(event).await;
    }

    /// Logs an unauthenticated access attempt.
    pub async fn log_unauthenticated_event(&self, request: Option<&AuthRequest>, reason: &str) {
        if !self.log_unauthenticated {
            return;
        }

        let mut event = AuditEvent::base(
            "authorization.middleware.unauthenticated",
            self.level_unauthenticated,
            "middleware",
        );
        event.request_id = Some(Self::request_id(request));
        event.identity = Some(AuditIdentity::from(&Identity::anonymous()));
        event.method = request.map(|r| r.method().to_string());
        event.path = request.map(|r| r.path().to_string());
        event.client_ip = Self::client_ip(request);
        event.reason = Some(reason.to_string());

        self.emit(event).await;
    }
}
