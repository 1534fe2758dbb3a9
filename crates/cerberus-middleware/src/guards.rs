//! Explicit per-route guards.
//!
//! Guards are the lower-level companion to the global authorization
//! middleware: a handler (or a framework integration) evaluates one against
//! the request before doing its work. Each guard builds a resource context,
//! funnels through [`AuthzEngine::check_decision`], and reports a
//! [`GuardOutcome`] that is translated to a transport status at exactly one
//! boundary ([`GuardOutcome::into_response`]).
//!
//! Unlike the middleware, guards do NOT fail closed on infrastructure
//! errors: without a circuit breaker configured on the engine, transport
//! errors propagate as `Err` for the caller to handle. This asymmetry is
//! deliberate - guards are the hook point for custom resilience.
//!
//! [`AuthzEngine::check_decision`]: cerberus_authz::AuthzEngine::check_decision

use std::sync::Arc;

use cerberus_authz::{AuthzEngine, AuthzError, AuthzResult, HierarchyCheck, HierarchyMode, IdSource};
use cerberus_core::{context, AuthRequest, ResourceContext, ResourceFetcher};
use cerberus_telemetry::audit::DecisionRecord;
use http::StatusCode;

use crate::types::{Response, ResponseExt};

/// Default subject type for relation checks.
pub const DEFAULT_SUBJECT_TYPE: &str = "user";

/// The result of evaluating a guard.
///
/// Decisions never throw: denial, missing identity, and missing resources
/// are ordinary variants, translated to status codes only at
/// [`into_response`](Self::into_response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The request may proceed.
    Allowed,
    /// The policy denied the request (403).
    Denied {
        /// Human-readable denial reason.
        reason: String,
    },
    /// No identity was present and the policy requires one (401).
    Unauthenticated,
    /// The resource being guarded does not exist (404).
    NotFound {
        /// What was looked up, e.g. `document`.
        what: String,
    },
}

impl GuardOutcome {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Translates the outcome to a response at the transport boundary.
    ///
    /// Returns `Ok(())` for [`Allowed`](Self::Allowed), otherwise the
    /// error response to send.
    pub fn into_response(self) -> Result<(), Response> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied { reason } => Err(Response::json_error(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                &reason,
            )),
            Self::Unauthenticated => Err(Response::json_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "authentication required",
            )),
            Self::NotFound { what } => Err(Response::json_error(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("{what} not found"),
            )),
        }
    }
}

/// Translates a guard infrastructure error to a response.
///
/// Configuration errors are programmer mistakes and surface as 500;
/// guessing a policy path would be unsafe. Transport errors reaching this
/// point (no breaker configured) also surface as 500 - callers wanting
/// fail-closed semantics use the global middleware instead.
#[must_use]
pub fn error_response(error: &AuthzError) -> Response {
    Response::json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "AUTHORIZATION_ERROR",
        &error.to_string(),
    )
}

/// Guard checking a caller-supplied policy path.
#[derive(Clone)]
pub struct PolicyGuard {
    engine: Arc<AuthzEngine>,
    policy_path: String,
    decision: String,
    static_context: Option<ResourceContext>,
}

impl PolicyGuard {
    /// Creates a guard for an explicit policy path.
    pub fn new(engine: Arc<AuthzEngine>, policy_path: impl Into<String>) -> Self {
        Self {
            engine,
            policy_path: policy_path.into(),
            decision: cerberus_authz::DEFAULT_DECISION.to_string(),
            static_context: None,
        }
    }

    /// Evaluates a different decision name than `allowed`.
    #[must_use]
    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = decision.into();
        self
    }

    /// Adds static context merged into every evaluation.
    #[must_use]
    pub fn with_context(mut self, ctx: ResourceContext) -> Self {
        self.static_context = Some(ctx);
        self
    }

    /// Evaluates the guard.
    pub async fn evaluate(&self, request: &AuthRequest) -> AuthzResult<GuardOutcome> {
        evaluate_policy(
            &self.engine,
            request,
            &self.policy_path,
            &self.decision,
            self.static_context.clone(),
        )
        .await
    }
}

/// Guard deriving the policy path from the matched route at request time.
///
/// Requires the router to expose the matched route *pattern* (dynamic
/// segments in their `{name}` form). A request without one is a
/// configuration error, not a denial.
#[derive(Clone)]
pub struct AutoPolicyGuard {
    engine: Arc<AuthzEngine>,
    decision: String,
    static_context: Option<ResourceContext>,
}

impl AutoPolicyGuard {
    /// Creates an auto-policy guard.
    pub fn new(engine: Arc<AuthzEngine>) -> Self {
        Self {
            engine,
            decision: cerberus_authz::DEFAULT_DECISION.to_string(),
            static_context: None,
        }
    }

    /// Evaluates a different decision name than `allowed`.
    #[must_use]
    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = decision.into();
        self
    }

    /// Adds static context merged into every evaluation.
    #[must_use]
    pub fn with_context(mut self, ctx: ResourceContext) -> Self {
        self.static_context = Some(ctx);
        self
    }

    /// Evaluates the guard.
    pub async fn evaluate(&self, request: &AuthRequest) -> AuthzResult<GuardOutcome> {
        let pattern = request.route_pattern().ok_or_else(|| {
            AuthzError::config("no matched route pattern for policy path auto-resolution")
        })?;
        let policy_path = self
            .engine
            .policy_path_for(request.method().as_str(), pattern);

        evaluate_policy(
            &self.engine,
            request,
            &policy_path,
            &self.decision,
            self.static_context.clone(),
        )
        .await
    }
}

async fn evaluate_policy(
    engine: &AuthzEngine,
    request: &AuthRequest,
    policy_path: &str,
    decision: &str,
    static_context: Option<ResourceContext>,
) -> AuthzResult<GuardOutcome> {
    let identity = engine.identity(request);
    let ctx = engine.request_context(request, static_context).await;

    tracing::debug!(
        policy_path,
        decision,
        identity = %identity,
        "guard authorization check"
    );

    let allowed = engine
        .check_decision(request, policy_path, decision, ctx.clone(), "guard")
        .await?;

    engine
        .audit_decision(
            request,
            DecisionRecord::policy(policy_path, allowed, identity.clone())
                .with_resource_context(ctx),
        )
        .await;

    if allowed {
        Ok(GuardOutcome::Allowed)
    } else {
        tracing::warn!(policy_path, identity = %identity, "access denied");
        Ok(GuardOutcome::Denied {
            reason: format!("access denied: {policy_path}"),
        })
    }
}

/// Guard checking a ReBAC relation against `{root}.check`.
#[derive(Clone)]
pub struct RelationGuard {
    engine: Arc<AuthzEngine>,
    object_type: String,
    relation: String,
    object_id: IdSource,
    subject_type: String,
}

impl RelationGuard {
    /// Creates a relation guard. The object id defaults to the path
    /// parameter named `id`.
    pub fn new(
        engine: Arc<AuthzEngine>,
        object_type: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            object_type: object_type.into(),
            relation: relation.into(),
            object_id: IdSource::Param("id".to_string()),
            subject_type: DEFAULT_SUBJECT_TYPE.to_string(),
        }
    }

    /// Overrides where the object id comes from.
    #[must_use]
    pub fn with_object_id(mut self, source: impl Into<IdSource>) -> Self {
        self.object_id = source.into();
        self
    }

    /// Overrides the subject type.
    #[must_use]
    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_type = subject_type.into();
        self
    }

    /// Evaluates the guard.
    pub async fn evaluate(&self, request: &AuthRequest) -> AuthzResult<GuardOutcome> {
        let object_id = self.object_id.resolve(request);
        let allowed = self
            .engine
            .check_relation(
                request,
                &self.object_type,
                &object_id,
                &self.relation,
                &self.subject_type,
            )
            .await?;

        if allowed {
            Ok(GuardOutcome::Allowed)
        } else {
            Ok(GuardOutcome::Denied {
                reason: format!(
                    "access denied: {} on {}:{object_id}",
                    self.relation, self.object_type
                ),
            })
        }
    }
}

/// Guard that fetches a resource, 404s when absent, then authorizes a
/// relation on it - returning the fetched resource so the handler does not
/// fetch twice.
pub struct ResourceGuard<T> {
    engine: Arc<AuthzEngine>,
    fetcher: Arc<dyn ResourceFetcher<T>>,
    object_type: String,
    relation: String,
    object_id: IdSource,
    subject_type: String,
}

impl<T> ResourceGuard<T> {
    /// Creates a resource guard. The object id defaults to the path
    /// parameter named `id`.
    pub fn new(
        engine: Arc<AuthzEngine>,
        fetcher: Arc<dyn ResourceFetcher<T>>,
        object_type: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            fetcher,
            object_type: object_type.into(),
            relation: relation.into(),
            object_id: IdSource::Param("id".to_string()),
            subject_type: DEFAULT_SUBJECT_TYPE.to_string(),
        }
    }

    /// Overrides where the object id comes from.
    #[must_use]
    pub fn with_object_id(mut self, source: impl Into<IdSource>) -> Self {
        self.object_id = source.into();
        self
    }

    /// Overrides the subject type.
    #[must_use]
    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_type = subject_type.into();
        self
    }

    /// Fetches the resource and evaluates the relation.
    ///
    /// Returns the resource on success; a missing resource is a 404-class
    /// outcome, distinct from a found-but-forbidden 403.
    pub async fn evaluate(&self, request: &AuthRequest) -> AuthzResult<Result<T, GuardOutcome>> {
        let Some(resource) = self.fetcher.fetch(request).await else {
            return Ok(Err(GuardOutcome::NotFound {
                what: self.object_type.clone(),
            }));
        };

        let object_id = self.object_id.resolve(request);
        let allowed = self
            .engine
            .check_relation(
                request,
                &self.object_type,
                &object_id,
                &self.relation,
                &self.subject_type,
            )
            .await?;

        if allowed {
            Ok(Ok(resource))
        } else {
            Ok(Err(GuardOutcome::Denied {
                reason: format!(
                    "access denied: {} on {}:{object_id}",
                    self.relation, self.object_type
                ),
            }))
        }
    }
}

/// Guard filtering a resource list down to the authorized subset.
#[derive(Clone)]
pub struct ListFilter {
    engine: Arc<AuthzEngine>,
    object_type: String,
    relation: String,
    subject_type: String,
}

impl ListFilter {
    /// Creates a list filter.
    pub fn new(
        engine: Arc<AuthzEngine>,
        object_type: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            object_type: object_type.into(),
            relation: relation.into(),
            subject_type: DEFAULT_SUBJECT_TYPE.to_string(),
        }
    }

    /// Overrides the subject type.
    #[must_use]
    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_type = subject_type.into();
        self
    }

    /// Filters `resources` to those the caller holds the relation on,
    /// preserving input order. Checks run concurrently, bounded by the
    /// engine's semaphore.
    pub async fn filter<T>(
        &self,
        request: &AuthRequest,
        resources: Vec<T>,
        id_extractor: impl Fn(&T) -> String + Sync,
    ) -> AuthzResult<Vec<T>> {
        self.engine
            .filter_authorized(
                request,
                resources,
                &self.object_type,
                &self.relation,
                id_extractor,
                &self.subject_type,
            )
            .await
    }
}

/// Guard evaluating a hierarchy of relation checks.
#[derive(Clone)]
pub struct HierarchyGuard {
    engine: Arc<AuthzEngine>,
    checks: Vec<HierarchyCheck>,
    mode: HierarchyMode,
    subject_type: String,
    optimize: bool,
}

impl HierarchyGuard {
    /// Creates a hierarchy guard with `All` semantics.
    pub fn new(engine: Arc<AuthzEngine>, checks: Vec<HierarchyCheck>) -> Self {
        Self {
            engine,
            checks,
            mode: HierarchyMode::All,
            subject_type: DEFAULT_SUBJECT_TYPE.to_string(),
            optimize: true,
        }
    }

    /// Sets the combination mode.
    #[must_use]
    pub fn with_mode(mut self, mode: HierarchyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the subject type.
    #[must_use]
    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_type = subject_type.into();
        self
    }

    /// Disables concurrent evaluation.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.optimize = false;
        self
    }

    /// Evaluates the guard.
    pub async fn evaluate(&self, request: &AuthRequest) -> AuthzResult<GuardOutcome> {
        let result = self
            .engine
            .check_hierarchy(
                request,
                &self.checks,
                self.mode,
                &self.subject_type,
                self.optimize,
            )
            .await?;

        if result.allowed {
            Ok(GuardOutcome::Allowed)
        } else {
            let reason = match &result.denied_at {
                Some(denied_at) => format!("access denied at {denied_at}"),
                None => "access denied: no matching permissions".to_string(),
            };
            Ok(GuardOutcome::Denied { reason })
        }
    }
}

/// Builds the relation resource context used by guards; exposed for
/// applications composing their own checks.
#[must_use]
pub fn relation_context(
    object_type: &str,
    object_id: &str,
    relation: &str,
    subject_type: &str,
) -> ResourceContext {
    let mut ctx = ResourceContext::new();
    ctx.insert(context::OBJECT_TYPE, object_type);
    ctx.insert(context::OBJECT_ID, object_id);
    ctx.insert(context::RELATION, relation);
    ctx.insert(context::SUBJECT_TYPE, subject_type);
    ctx
}
