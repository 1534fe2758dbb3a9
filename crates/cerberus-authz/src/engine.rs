//! The authorization engine.
//!
//! [`AuthzEngine`] ties the decision cache, connection pool, and circuit
//! breaker together behind one operation - [`check_decision`] - that every
//! higher-level API funnels through. The higher-level operations
//! ([`is_allowed`], [`check_relation`], [`check_relations`],
//! [`check_hierarchy`]) build resource contexts and interpret results but
//! never talk to the authorizer directly.
//!
//! [`check_decision`]: AuthzEngine::check_decision
//! [`is_allowed`]: AuthzEngine::is_allowed
//! [`check_relation`]: AuthzEngine::check_relation
//! [`check_relations`]: AuthzEngine::check_relations
//! [`check_hierarchy`]: AuthzEngine::check_hierarchy

use std::collections::BTreeMap;
use std::sync::Arc;

use cerberus_core::{
    context, AuthRequest, Identity, IdentityProvider, ResourceContext, ResourceContextProvider,
};
use cerberus_telemetry::audit::DecisionRecord;
use cerberus_telemetry::{metrics, AuditLogger, AuthSpan};
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::breaker::CircuitBreaker;
use crate::cache::{DecisionCache, StaleCache};
use crate::error::{AuthzError, AuthzResult};
use crate::policy::{resolve_policy_path, IdSource};
use crate::pool::ConnectionPool;
use crate::transport::{
    AuthorizerOptions, DecisionRequest, HttpTransportFactory, TransportFactory,
};

/// Default decision name evaluated when none is given.
pub const DEFAULT_DECISION: &str = "allowed";

/// How a batch of hierarchy checks is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyMode {
    /// All checks must pass (AND). Sequential evaluation fails fast.
    All,
    /// At least one check must pass (OR).
    Any,
    /// Return on the first check that passes, recording its relation.
    /// Always evaluated sequentially - order is significant.
    FirstMatch,
}

/// One element of a hierarchy check: which object, where its id comes from,
/// and the relation to test.
#[derive(Debug, Clone)]
pub struct HierarchyCheck {
    /// Object type, e.g. `organization`.
    pub object_type: String,
    /// Where the object id comes from.
    pub id_source: IdSource,
    /// Relation to test, e.g. `member`.
    pub relation: String,
}

impl HierarchyCheck {
    /// Creates a check. The id source accepts the string forms understood
    /// by [`IdSource::parse`].
    pub fn new(
        object_type: impl Into<String>,
        id_source: impl Into<IdSource>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            id_source: id_source.into(),
            relation: relation.into(),
        }
    }
}

/// Result of a hierarchy authorization check.
#[derive(Debug, Clone)]
pub struct HierarchyResult {
    /// Whether the hierarchy check passed under the requested mode.
    pub allowed: bool,
    /// Every evaluated check as `(object_type, object_id, relation, allowed)`,
    /// in input order.
    pub checks: Vec<(String, String, String, bool)>,
    /// Object type at which access was denied (`All` mode only).
    pub denied_at: Option<String>,
    /// Relation that matched first (`FirstMatch` mode only).
    pub first_match: Option<String>,
}

impl HierarchyResult {
    /// Returns a map from object type to check result.
    #[must_use]
    pub fn as_map(&self) -> BTreeMap<String, bool> {
        self.checks
            .iter()
            .map(|(object_type, _, _, allowed)| (object_type.clone(), *allowed))
            .collect()
    }
}

/// Builder for [`AuthzEngine`].
pub struct AuthzEngineBuilder {
    policy_root: String,
    policy_instance_name: String,
    policy_instance_label: Option<String>,
    identity_provider: Arc<dyn IdentityProvider>,
    options: Option<AuthorizerOptions>,
    factory: Option<Arc<dyn TransportFactory>>,
    resource_context_provider: Option<Arc<dyn ResourceContextProvider>>,
    cache: Option<DecisionCache>,
    breaker: Option<CircuitBreaker>,
    pool: Option<Arc<ConnectionPool>>,
    audit: Option<Arc<AuditLogger>>,
    max_concurrent_checks: usize,
}

impl AuthzEngineBuilder {
    /// Starts a builder with the required pieces.
    pub fn new(
        policy_root: impl Into<String>,
        policy_instance_name: impl Into<String>,
        identity_provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            policy_root: policy_root.into(),
            policy_instance_name: policy_instance_name.into(),
            policy_instance_label: None,
            identity_provider,
            options: None,
            factory: None,
            resource_context_provider: None,
            cache: None,
            breaker: None,
            pool: None,
            audit: None,
            max_concurrent_checks: 10,
        }
    }

    /// Connects to the authorizer over HTTP with the given options.
    #[must_use]
    pub fn with_options(mut self, options: AuthorizerOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Uses a custom transport factory instead of the HTTP default.
    #[must_use]
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Overrides the policy instance label (defaults to the instance name).
    #[must_use]
    pub fn with_policy_instance_label(mut self, label: impl Into<String>) -> Self {
        self.policy_instance_label = Some(label.into());
        self
    }

    /// Supplies extra per-request resource context.
    #[must_use]
    pub fn with_resource_context_provider(
        mut self,
        provider: Arc<dyn ResourceContextProvider>,
    ) -> Self {
        self.resource_context_provider = Some(provider);
        self
    }

    /// Enables the fresh decision cache.
    #[must_use]
    pub fn with_cache(mut self, cache: DecisionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enables the circuit breaker.
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Enables the connection pool.
    #[must_use]
    pub fn with_connection_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Enables audit logging.
    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Bounds concurrent fan-out checks (default 10).
    #[must_use]
    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max.max(1);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither authorizer options nor a
    /// transport factory was supplied.
    pub fn build(self) -> AuthzResult<AuthzEngine> {
        let factory: Arc<dyn TransportFactory> = match (self.factory, self.options) {
            (Some(factory), _) => factory,
            (None, Some(options)) => Arc::new(HttpTransportFactory::new(options)),
            (None, None) => {
                return Err(AuthzError::config(
                    "engine needs authorizer options or a transport factory",
                ))
            }
        };

        if let Some(pool) = &self.pool {
            pool.configure(Arc::clone(&factory));
        }

        let label = self
            .policy_instance_label
            .unwrap_or_else(|| self.policy_instance_name.clone());

        Ok(AuthzEngine {
            policy_root: self.policy_root,
            policy_instance_name: self.policy_instance_name,
            policy_instance_label: label,
            identity_provider: self.identity_provider,
            factory,
            resource_context_provider: self.resource_context_provider,
            cache: self.cache,
            stale_cache: StaleCache::new(),
            breaker: self.breaker,
            pool: self.pool,
            audit: self.audit,
            semaphore: Arc::new(Semaphore::new(self.max_concurrent_checks)),
        })
    }
}

/// The authorization engine.
///
/// Create one per application at startup (via [`AuthzEngineBuilder`]) and
/// share it behind an `Arc`.
pub struct AuthzEngine {
    policy_root: String,
    policy_instance_name: String,
    policy_instance_label: String,
    identity_provider: Arc<dyn IdentityProvider>,
    factory: Arc<dyn TransportFactory>,
    resource_context_provider: Option<Arc<dyn ResourceContextProvider>>,
    cache: Option<DecisionCache>,
    stale_cache: StaleCache,
    breaker: Option<CircuitBreaker>,
    pool: Option<Arc<ConnectionPool>>,
    audit: Option<Arc<AuditLogger>>,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for AuthzEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzEngine")
            .field("policy_root", &self.policy_root)
            .field("policy_instance_name", &self.policy_instance_name)
            .field("cache", &self.cache.is_some())
            .field("breaker", &self.breaker.is_some())
            .field("pool", &self.pool.is_some())
            .finish()
    }
}

impl AuthzEngine {
    /// Starts a builder.
    pub fn builder(
        policy_root: impl Into<String>,
        policy_instance_name: impl Into<String>,
        identity_provider: Arc<dyn IdentityProvider>,
    ) -> AuthzEngineBuilder {
        AuthzEngineBuilder::new(policy_root, policy_instance_name, identity_provider)
    }

    /// Returns the policy path root.
    #[must_use]
    pub fn policy_root(&self) -> &str {
        &self.policy_root
    }

    /// Returns the audit logger, if configured.
    #[must_use]
    pub fn audit_logger(&self) -> Option<&Arc<AuditLogger>> {
        self.audit.as_ref()
    }

    /// Returns the circuit breaker, if configured.
    #[must_use]
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Returns the connection pool, if configured.
    #[must_use]
    pub fn connection_pool(&self) -> Option<&Arc<ConnectionPool>> {
        self.pool.as_ref()
    }

    /// Returns the semaphore bounding concurrent fan-out checks.
    #[must_use]
    pub fn check_semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }

    /// Resolves the caller identity for a request.
    #[must_use]
    pub fn identity(&self, request: &AuthRequest) -> Identity {
        self.identity_provider.identity(request)
    }

    /// Previews the policy path for a method and route pattern.
    #[must_use]
    pub fn policy_path_for(&self, method: &str, route_pattern: &str) -> String {
        resolve_policy_path(&self.policy_root, method, route_pattern)
    }

    /// Clears the fresh decision cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Builds the per-request resource context: static context, then the
    /// provider's output, then route path parameters. Later sources win.
    pub async fn request_context(
        &self,
        request: &AuthRequest,
        static_context: Option<ResourceContext>,
    ) -> ResourceContext {
        let mut ctx = static_context.unwrap_or_default();
        if let Some(provider) = &self.resource_context_provider {
            ctx.merge(provider.context(request).await);
        }
        ctx.extend_strings(
            request
                .path_params()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        ctx
    }

    fn stale_decision(
        &self,
        identity_value: &str,
        policy_path: &str,
        decision: &str,
        ctx: &ResourceContext,
    ) -> Option<bool> {
        let breaker = self.breaker.as_ref()?;
        let stale = self.stale_cache.get(
            identity_value,
            policy_path,
            decision,
            ctx,
            breaker.config().stale_cache_ttl,
        );
        breaker.filter_stale(policy_path, stale)
    }

    /// Issues the decision request, through the pool when one is configured.
    async fn call_authorizer(
        &self,
        identity: Identity,
        policy_path: &str,
        decision: &str,
        ctx: &ResourceContext,
    ) -> AuthzResult<bool> {
        let request = DecisionRequest {
            identity,
            policy_path: policy_path.to_string(),
            decisions: vec![decision.to_string()],
            policy_instance_name: self.policy_instance_name.clone(),
            policy_instance_label: self.policy_instance_label.clone(),
            resource_context: ctx.clone(),
        };

        let decisions = if let Some(pool) = &self.pool {
            let conn = pool.acquire().await?;
            let result = conn.client().decide(request).await;
            if let Err(e) = &result {
                if e.is_transient() {
                    conn.mark_unhealthy();
                }
            }
            pool.release(conn);
            result?
        } else {
            let client = self.factory.connect()?;
            client.decide(request).await?
        };

        Ok(decisions.get(decision).copied().unwrap_or(false))
    }

    async fn check_decision_inner(
        &self,
        request: &AuthRequest,
        identity: Identity,
        policy_path: &str,
        decision: &str,
        ctx: &ResourceContext,
        source: &str,
        cached_result: &mut bool,
    ) -> AuthzResult<bool> {
        let identity_value = identity.value().unwrap_or("").to_string();
        let identity_value = identity_value.as_str();
        // Fresh cache first
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(identity_value, policy_path, decision, ctx) {
                tracing::debug!(policy_path, decision, "decision cache hit");
                *cached_result = true;
                metrics::record_cache_hit(source);
                return Ok(cached);
            }
            metrics::record_cache_miss(source);
        }

        // Circuit breaker gate: when open, no network call is attempted
        if let Some(breaker) = &self.breaker {
            if !breaker.should_allow_request() {
                let stale = self.stale_decision(identity_value, policy_path, decision, ctx);
                tracing::warn!(
                    policy_path,
                    stale_cache = if stale.is_some() { "hit" } else { "miss" },
                    "circuit open, using fallback"
                );

                let error = AuthzError::connect("circuit breaker open");
                let result = breaker
                    .get_fallback_decision(request, policy_path, ctx, stale, &error)
                    .await;
                metrics::record_fallback("circuit_open", stale.is_some(), result);
                return Ok(result);
            }
        }

        // Live authorizer call
        let call_start = Instant::now();
        match self
            .call_authorizer(identity, policy_path, decision, ctx)
            .await
        {
            Ok(result) => {
                metrics::record_authorizer_latency(call_start.elapsed());

                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                    // Successful real decisions feed the fallback side table
                    self.stale_cache
                        .set(identity_value, policy_path, decision, ctx, result);
                }

                if let Some(cache) = &self.cache {
                    cache.set(identity_value, policy_path, decision, ctx, result);
                    metrics::set_cache_size(cache.len());
                }

                Ok(result)
            }
            Err(error) => {
                metrics::record_error(error.kind());

                if let Some(breaker) = &self.breaker {
                    if breaker.is_failure_error(&error) {
                        breaker.record_failure(&error);

                        let stale = self.stale_decision(identity_value, policy_path, decision, ctx);
                        tracing::warn!(
                            policy_path,
                            error = %error,
                            "authorizer call failed, using fallback"
                        );

                        let result = breaker
                            .get_fallback_decision(request, policy_path, ctx, stale, &error)
                            .await;
                        metrics::record_fallback("error", stale.is_some(), result);
                        return Ok(result);
                    }
                }

                Err(error)
            }
        }
    }

    /// Checks a single authorization decision.
    ///
    /// The core decision pipeline: cache lookup, circuit breaker gate,
    /// pooled authorizer call, result caching. Every path records latency
    /// and auth-request metrics and finishes the check's tracing span.
    ///
    /// # Errors
    ///
    /// Infrastructure errors propagate only when no circuit breaker is
    /// configured or the breaker does not classify the error as a failure.
    /// Denials are `Ok(false)`, never errors.
    pub async fn check_decision(
        &self,
        request: &AuthRequest,
        policy_path: &str,
        decision: &str,
        ctx: ResourceContext,
        source: &str,
    ) -> AuthzResult<bool> {
        let identity = self.identity_provider.identity(request);

        let span = AuthSpan::start(source, "policy", Some(policy_path), identity.value());
        let start = Instant::now();
        let mut cached_result = false;

        let result = self
            .check_decision_inner(
                request,
                identity,
                policy_path,
                decision,
                &ctx,
                source,
                &mut cached_result,
            )
            .await;

        let latency = start.elapsed();
        let allowed = matches!(result, Ok(true));
        metrics::record_auth_request(source, allowed, "policy");
        metrics::record_latency(latency, source, cached_result);

        match &result {
            Ok(value) => span.finish(*value, cached_result, latency.as_secs_f64() * 1000.0, Some(&ctx)),
            Err(error) => span.record_error(error),
        }

        result
    }

    /// Checks whether an action is allowed, without raising on denial.
    ///
    /// Merges the static context with the provider output and path
    /// parameters, then evaluates the `allowed` decision. Useful for
    /// conditional UI logic (show/hide an edit button) where a denial is
    /// just `false`.
    pub async fn is_allowed(
        &self,
        request: &AuthRequest,
        policy_path: &str,
        static_context: Option<ResourceContext>,
    ) -> AuthzResult<bool> {
        let ctx = self.request_context(request, static_context).await;
        self.check_decision(request, policy_path, DEFAULT_DECISION, ctx, "manual")
            .await
    }

    /// Checks a single ReBAC relation, without raising on denial.
    ///
    /// Evaluates the fixed `{root}.check` policy path with the relation
    /// tuple in the resource context.
    pub async fn check_relation(
        &self,
        request: &AuthRequest,
        object_type: &str,
        object_id: &str,
        relation: &str,
        subject_type: &str,
    ) -> AuthzResult<bool> {
        let mut ctx = ResourceContext::new();
        if let Some(provider) = &self.resource_context_provider {
            ctx.merge(provider.context(request).await);
        }
        ctx.insert(context::OBJECT_TYPE, object_type);
        ctx.insert(context::OBJECT_ID, object_id);
        ctx.insert(context::RELATION, relation);
        ctx.insert(context::SUBJECT_TYPE, subject_type);

        let policy_path = format!("{}.check", self.policy_root);
        self.check_decision(request, &policy_path, DEFAULT_DECISION, ctx, "manual")
            .await
    }

    /// Checks several relations on one object concurrently.
    ///
    /// Fan-out is bounded by the engine's semaphore; the returned map is
    /// keyed by relation, matching the input order of a `BTreeMap`
    /// iteration regardless of completion order.
    pub async fn check_relations(
        &self,
        request: &AuthRequest,
        object_type: &str,
        object_id: &str,
        relations: &[&str],
        subject_type: &str,
    ) -> AuthzResult<BTreeMap<String, bool>> {
        let start = Instant::now();

        let checks = relations.iter().copied().map(|relation| async move {
            let _permit = self.semaphore.acquire().await;
            let allowed = self
                .check_relation(request, object_type, object_id, relation, subject_type)
                .await?;
            Ok::<(String, bool), AuthzError>((relation.to_string(), allowed))
        });

        let results: BTreeMap<String, bool> = join_all(checks)
            .await
            .into_iter()
            .collect::<AuthzResult<_>>()?;

        if let Some(audit) = &self.audit {
            let identity = self.identity_provider.identity(request);
            audit
                .log_batch_check(
                    Some(request),
                    object_type,
                    object_id,
                    &results,
                    Some(start.elapsed().as_secs_f64() * 1000.0),
                    &identity,
                )
                .await;
        }

        Ok(results)
    }

    /// Checks a chain of relations over hierarchical resources.
    ///
    /// `All` and `Any` modes run concurrently when `optimize` is set;
    /// `FirstMatch` is order-sensitive and always sequential. With
    /// concurrent execution every check still runs to completion - only the
    /// result interpretation short-circuits, and the reported `denied_at` is
    /// the first failing check in input order.
    pub async fn check_hierarchy(
        &self,
        request: &AuthRequest,
        checks: &[HierarchyCheck],
        mode: HierarchyMode,
        subject_type: &str,
        optimize: bool,
    ) -> AuthzResult<HierarchyResult> {
        if mode == HierarchyMode::FirstMatch || !optimize {
            return self
                .check_hierarchy_sequential(request, checks, mode, subject_type)
                .await;
        }
        self.check_hierarchy_concurrent(request, checks, mode, subject_type)
            .await
    }

    async fn check_hierarchy_sequential(
        &self,
        request: &AuthRequest,
        checks: &[HierarchyCheck],
        mode: HierarchyMode,
        subject_type: &str,
    ) -> AuthzResult<HierarchyResult> {
        let mut results: Vec<(String, String, String, bool)> = Vec::new();

        for check in checks {
            let object_id = check.id_source.resolve(request);
            let allowed = self
                .check_relation(
                    request,
                    &check.object_type,
                    &object_id,
                    &check.relation,
                    subject_type,
                )
                .await?;
            results.push((
                check.object_type.clone(),
                object_id,
                check.relation.clone(),
                allowed,
            ));

            match mode {
                HierarchyMode::All if !allowed => {
                    return Ok(HierarchyResult {
                        allowed: false,
                        denied_at: Some(check.object_type.clone()),
                        first_match: None,
                        checks: results,
                    });
                }
                HierarchyMode::Any if allowed => {
                    return Ok(HierarchyResult {
                        allowed: true,
                        denied_at: None,
                        first_match: None,
                        checks: results,
                    });
                }
                HierarchyMode::FirstMatch if allowed => {
                    return Ok(HierarchyResult {
                        allowed: true,
                        denied_at: None,
                        first_match: Some(check.relation.clone()),
                        checks: results,
                    });
                }
                _ => {}
            }
        }

        Ok(HierarchyResult {
            allowed: mode == HierarchyMode::All,
            denied_at: None,
            first_match: None,
            checks: results,
        })
    }

    async fn check_hierarchy_concurrent(
        &self,
        request: &AuthRequest,
        checks: &[HierarchyCheck],
        mode: HierarchyMode,
        subject_type: &str,
    ) -> AuthzResult<HierarchyResult> {
        let futures = checks.iter().map(|check| async move {
            let object_id = check.id_source.resolve(request);
            let _permit = self.semaphore.acquire().await;
            let allowed = self
                .check_relation(
                    request,
                    &check.object_type,
                    &object_id,
                    &check.relation,
                    subject_type,
                )
                .await?;
            Ok::<(String, String, String, bool), AuthzError>((
                check.object_type.clone(),
                object_id,
                check.relation.clone(),
                allowed,
            ))
        });

        let results: Vec<(String, String, String, bool)> = join_all(futures)
            .await
            .into_iter()
            .collect::<AuthzResult<_>>()?;

        match mode {
            HierarchyMode::Any => {
                let allowed = results.iter().any(|(_, _, _, allowed)| *allowed);
                Ok(HierarchyResult {
                    allowed,
                    denied_at: None,
                    first_match: None,
                    checks: results,
                })
            }
            _ => {
                // All mode: the scan order, not execution order, picks denied_at
                let denied_at = results
                    .iter()
                    .find(|(_, _, _, allowed)| !allowed)
                    .map(|(object_type, _, _, _)| object_type.clone());
                Ok(HierarchyResult {
                    allowed: denied_at.is_none(),
                    denied_at,
                    first_match: None,
                    checks: results,
                })
            }
        }
    }

    /// Filters a list of resources down to those the caller holds `relation`
    /// on, preserving input order. Checks run concurrently, bounded by the
    /// engine's semaphore.
    pub async fn filter_authorized<T>(
        &self,
        request: &AuthRequest,
        resources: Vec<T>,
        object_type: &str,
        relation: &str,
        id_extractor: impl Fn(&T) -> String + Sync,
        subject_type: &str,
    ) -> AuthzResult<Vec<T>> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let id_extractor = &id_extractor;
        let checks = resources.iter().map(|resource| async move {
            let object_id = id_extractor(resource);
            let _permit = self.semaphore.acquire().await;
            self.check_relation(request, object_type, &object_id, relation, subject_type)
                .await
        });

        let verdicts: Vec<bool> = join_all(checks)
            .await
            .into_iter()
            .collect::<AuthzResult<_>>()?;

        Ok(resources
            .into_iter()
            .zip(verdicts)
            .filter_map(|(resource, allowed)| allowed.then_some(resource))
            .collect())
    }

    /// Audits a decision on behalf of a guard or the middleware.
    pub async fn audit_decision(&self, request: &AuthRequest, record: DecisionRecord) {
        if let Some(audit) = &self.audit {
            audit.log_decision(Some(request), record).await;
        }
    }
}
