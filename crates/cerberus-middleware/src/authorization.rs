//! Global authorization middleware.
//!
//! One instance wraps the whole application and auto-protects every route:
//! the policy path is derived from the matched route's method and pattern,
//! so adding an endpoint adds its policy obligation with no per-route code.
//!
//! Exclusions: safe methods (`OPTIONS`, `HEAD` by default), path regexes,
//! and routes registered as excluded in the [`RouteTable`]. Unmatched
//! requests pass through to become the router's 404.
//!
//! On any unexpected error during the check the middleware fails closed
//! and answers 403 - this holds even without a circuit breaker configured.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use cerberus_authz::AuthzEngine;
use cerberus_core::{AuthRequest, Identity};
use cerberus_telemetry::audit::DecisionRecord;
use http::{Method, StatusCode};
use regex::Regex;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::routes::RouteTable;
use crate::types::{auth_request_from, Request, Response, ResponseExt};

/// What to do when the identity provider yields no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingIdentityPolicy {
    /// Reject immediately with 401.
    Deny,
    /// Proceed with an anonymous identity and let the policy decide.
    Anonymous,
}

/// Customizes the response sent on denial.
pub type DeniedResponseFn = Arc<dyn Fn(&AuthRequest, &str) -> Response + Send + Sync>;

/// Builder for [`AuthorizationMiddleware`].
pub struct AuthorizationMiddlewareBuilder {
    engine: Arc<AuthzEngine>,
    routes: Arc<RouteTable>,
    exclude_paths: Vec<Regex>,
    exclude_methods: HashSet<Method>,
    on_missing_identity: MissingIdentityPolicy,
    on_denied: Option<DeniedResponseFn>,
}

impl AuthorizationMiddlewareBuilder {
    /// Excludes paths matching a regex (e.g. `^/health$`, `^/docs.*`).
    ///
    /// Invalid patterns are rejected at build time by `Regex::new`.
    #[must_use]
    pub fn exclude_path(mut self, pattern: Regex) -> Self {
        self.exclude_paths.push(pattern);
        self
    }

    /// Replaces the excluded method set (default `{OPTIONS, HEAD}`).
    #[must_use]
    pub fn exclude_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.exclude_methods = methods.into_iter().collect();
        self
    }

    /// Sets the missing-identity policy (default [`MissingIdentityPolicy::Deny`]).
    #[must_use]
    pub fn on_missing_identity(mut self, policy: MissingIdentityPolicy) -> Self {
        self.on_missing_identity = policy;
        self
    }

    /// Customizes the denial response.
    #[must_use]
    pub fn on_denied(mut self, f: DeniedResponseFn) -> Self {
        self.on_denied = Some(f);
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> AuthorizationMiddleware {
        AuthorizationMiddleware {
            engine: self.engine,
            routes: self.routes,
            exclude_paths: self.exclude_paths,
            exclude_methods: self.exclude_methods,
            on_missing_identity: self.on_missing_identity,
            on_denied: self.on_denied,
        }
    }
}

/// The global authorization middleware stage.
pub struct AuthorizationMiddleware {
    engine: Arc<AuthzEngine>,
    routes: Arc<RouteTable>,
    exclude_paths: Vec<Regex>,
    exclude_methods: HashSet<Method>,
    on_missing_identity: MissingIdentityPolicy,
    on_denied: Option<DeniedResponseFn>,
}

impl AuthorizationMiddleware {
    /// Starts a builder.
    #[must_use]
    pub fn builder(
        engine: Arc<AuthzEngine>,
        routes: Arc<RouteTable>,
    ) -> AuthorizationMiddlewareBuilder {
        AuthorizationMiddlewareBuilder {
            engine,
            routes,
            exclude_paths: Vec::new(),
            exclude_methods: [Method::OPTIONS, Method::HEAD].into_iter().collect(),
            on_missing_identity: MissingIdentityPolicy::Deny,
            on_denied: None,
        }
    }

    /// Creates the middleware with default settings.
    #[must_use]
    pub fn new(engine: Arc<AuthzEngine>, routes: Arc<RouteTable>) -> Self {
        Self::builder(engine, routes).build()
    }

    fn is_excluded(&self, method: &Method, path: &str, skip_marker: bool) -> bool {
        if self.exclude_methods.contains(method) {
            return true;
        }
        if self.exclude_paths.iter().any(|p| p.is_match(path)) {
            return true;
        }
        skip_marker
    }
}

impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let route = self.routes.match_route(&method, &path);
            let skip_marker = route.as_ref().is_some_and(|r| r.skip_authorization);

            if self.is_excluded(&method, &path, skip_marker) {
                return next.run(ctx, request).await;
            }

            // Unmatched request: pass through to become the router's 404
            let Some(route) = route else {
                return next.run(ctx, request).await;
            };

            let policy_path = self
                .engine
                .policy_path_for(method.as_str(), &route.pattern);
            let auth_request = auth_request_from(&request, Some(&route));

            let start = Instant::now();
            let mut identity = self.engine.identity(&auth_request);

            if identity.is_anonymous() {
                match self.on_missing_identity {
                    MissingIdentityPolicy::Deny => {
                        if let Some(audit) = self.engine.audit_logger() {
                            audit
                                .log_unauthenticated_event(Some(&auth_request), "missing_identity")
                                .await;
                        }
                        return Response::json_error(
                            StatusCode::UNAUTHORIZED,
                            "UNAUTHORIZED",
                            "authentication required",
                        );
                    }
                    MissingIdentityPolicy::Anonymous => {
                        // The policy sees the anonymous identity and decides
                        identity = Identity::manual("anonymous");
                    }
                }
            }

            let resource_context = self.engine.request_context(&auth_request, None).await;

            // Fail closed: an error during the check is a denial, never a 500
            let allowed = match self
                .engine
                .check_decision(
                    &auth_request,
                    &policy_path,
                    cerberus_authz::DEFAULT_DECISION,
                    resource_context.clone(),
                    "middleware",
                )
                .await
            {
                Ok(allowed) => allowed,
                Err(error) => {
                    tracing::error!(
                        policy_path,
                        error = %error,
                        "authorization check failed, failing closed"
                    );
                    false
                }
            };

            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.engine
                .audit_decision(
                    &auth_request,
                    DecisionRecord {
                        policy_path: policy_path.clone(),
                        allowed,
                        source: "middleware".to_string(),
                        check_type: "policy".to_string(),
                        cached: false,
                        latency_ms: Some(latency_ms),
                        identity: identity.clone(),
                        object_type: None,
                        object_id: None,
                        relation: None,
                        subject_type: None,
                        resource_context: Some(resource_context),
                    },
                )
                .await;

            if !allowed {
                return match &self.on_denied {
                    Some(custom) => custom(&auth_request, &policy_path),
                    None => Response::json_error(StatusCode::FORBIDDEN, "FORBIDDEN", "forbidden"),
                };
            }

            // Successful requests carry the route match downstream
            ctx.set_identity(identity);
            ctx.set_route(route.pattern.clone(), route.params.clone());
            next.run(ctx, request).await
        })
    }
}
