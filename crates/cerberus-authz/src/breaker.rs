//! Circuit breaker for graceful degradation when the authorizer is down.
//!
//! Detects consecutive failures, opens the circuit to stop issuing calls,
//! and serves a fallback decision (optionally from the stale cache) until
//! a probe confirms recovery.
//!
//! State machine:
//!
//! ```text
//!            failure_threshold reached
//!   CLOSED ───────────────────────────► OPEN
//!     ▲                                   │ recovery_timeout elapsed
//!     │ success_threshold successes       ▼ (checked lazily in
//!     └───────────────────────────── HALF_OPEN   should_allow_request)
//!                 any failure ───────────► OPEN
//! ```

use std::sync::Arc;

use cerberus_core::{AuthRequest, BoxFuture, ResourceContext};
use cerberus_telemetry::metrics;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use wildmatch::WildMatch;

use crate::error::{AuthzError, AuthzResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls go through.
    Closed,
    /// Failing; calls are short-circuited to the fallback.
    Open,
    /// Probing recovery with a limited number of requests.
    HalfOpen,
}

impl CircuitState {
    /// Returns the lowercase name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of breaker state for health endpoints.
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed.
    pub failure_count: u32,
    /// Consecutive successes while half-open.
    pub success_count: u32,
    /// When the last failure was recorded.
    pub last_failure_time: Option<Instant>,
    /// When the last success was recorded.
    pub last_success_time: Option<Instant>,
    /// When the circuit opened, if it is open.
    pub open_since: Option<Instant>,
}

impl CircuitStatus {
    /// Whether the circuit is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Inputs handed to a custom fallback decider.
#[derive(Debug)]
pub struct FallbackContext<'a> {
    /// The request being authorized.
    pub request: &'a AuthRequest,
    /// The policy path being checked.
    pub policy_path: &'a str,
    /// The resource context of the check.
    pub resource_context: &'a ResourceContext,
    /// Stale cached decision, if one was available and not filtered out.
    pub stale_decision: Option<bool>,
    /// The error that triggered the fallback.
    pub error: &'a AuthzError,
}

/// A custom fallback decision function, sync or async.
///
/// Errors from a decider are logged and mapped to deny; they never abort
/// the authorization flow.
pub trait FallbackDecider: Send + Sync {
    /// Produces the fallback decision.
    fn decide<'a>(&'a self, ctx: FallbackContext<'a>) -> BoxFuture<'a, AuthzResult<bool>>;
}

/// Strategy used when the circuit will not let a call through.
#[derive(Clone)]
pub enum FallbackStrategy {
    /// Always deny.
    Deny,
    /// Always allow.
    Allow,
    /// Serve the stale cached decision; deny when there is none.
    CacheThenDeny,
    /// Serve the stale cached decision; allow when there is none.
    CacheThenAllow,
    /// Delegate to a custom decider.
    Custom(Arc<dyn FallbackDecider>),
}

impl std::fmt::Debug for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deny => write!(f, "FallbackStrategy::Deny"),
            Self::Allow => write!(f, "FallbackStrategy::Allow"),
            Self::CacheThenDeny => write!(f, "FallbackStrategy::CacheThenDeny"),
            Self::CacheThenAllow => write!(f, "FallbackStrategy::CacheThenAllow"),
            Self::Custom(_) => write!(f, "FallbackStrategy::Custom(<fn>)"),
        }
    }
}

impl FallbackStrategy {
    /// Parses a strategy name from configuration.
    ///
    /// Unknown names log an error and map to `Deny`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "deny" => Self::Deny,
            "allow" => Self::Allow,
            "cache_then_deny" => Self::CacheThenDeny,
            "cache_then_allow" => Self::CacheThenAllow,
            other => {
                tracing::error!(strategy = other, "unknown fallback strategy, defaulting to deny");
                Self::Deny
            }
        }
    }
}

/// Callback invoked on every state transition: `(old, new, reason)`.
pub type StateChangeCallback = Arc<dyn Fn(CircuitState, CircuitState, &str) + Send + Sync>;

/// Callback invoked after a fallback decision:
/// `(request, policy_path, stale_decision, result)`.
pub type FallbackCallback = Arc<dyn Fn(&AuthRequest, &str, Option<bool>, bool) + Send + Sync>;

/// Predicate deciding whether an error counts toward tripping the breaker.
pub type FailureClassifier = Arc<dyn Fn(&AuthzError) -> bool + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,
    /// How long to stay open before probing recovery.
    pub recovery_timeout: Duration,
    /// Probe requests admitted while half-open.
    pub half_open_max_requests: u32,
    /// Strategy when the circuit will not let a call through.
    pub fallback: FallbackStrategy,
    /// Whether the fallback path may serve expired cache entries.
    pub serve_stale_cache: bool,
    /// Maximum age of a stale cache entry the fallback may serve.
    pub stale_cache_ttl: Duration,
    /// Glob patterns of policy paths that must never be served stale.
    pub no_stale_for: Vec<String>,
    /// Which errors count as breaker failures. Defaults to transient
    /// infrastructure failures; application-level denials never count.
    pub failure_classifier: FailureClassifier,
    /// Invoked on every state transition.
    pub on_state_change: Option<StateChangeCallback>,
    /// Invoked after each fallback decision.
    pub on_fallback: Option<FallbackCallback>,
}

impl std::fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("half_open_max_requests", &self.half_open_max_requests)
            .field("fallback", &self.fallback)
            .field("serve_stale_cache", &self.serve_stale_cache)
            .field("stale_cache_ttl", &self.stale_cache_ttl)
            .field("no_stale_for", &self.no_stale_for)
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_fallback", &self.on_fallback.is_some())
            .finish()
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
            fallback: FallbackStrategy::CacheThenDeny,
            serve_stale_cache: true,
            stale_cache_ttl: Duration::from_secs(300),
            no_stale_for: Vec::new(),
            failure_classifier: Arc::new(AuthzError::is_transient),
            on_state_change: None,
            on_fallback: None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
    open_since: Option<Instant>,
    half_open_requests: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_success_time: None,
            open_since: None,
            half_open_requests: 0,
        }
    }
}

/// The circuit breaker.
///
/// All state lives behind a single mutex, held only for the duration of a
/// state check or mutation - never across an await point. Transition
/// callbacks run after the lock is released.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state.lock().state)
            .finish()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a breaker with the given configuration.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    /// Returns the breaker configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Returns a snapshot for health checks.
    #[must_use]
    pub fn status(&self) -> CircuitStatus {
        let state = self.state.lock();
        CircuitStatus {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
            last_success_time: state.last_success_time,
            open_since: state.open_since,
        }
    }

    /// Applies a transition inside the lock; returns the event to report
    /// once the lock is released.
    fn transition_to(
        state: &mut BreakerState,
        new_state: CircuitState,
        reason: &'static str,
    ) -> Option<(CircuitState, CircuitState, &'static str)> {
        let old_state = state.state;
        if old_state == new_state {
            return None;
        }

        state.state = new_state;
        match new_state {
            CircuitState::Open => {
                state.open_since = Some(Instant::now());
                state.half_open_requests = 0;
            }
            CircuitState::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
                state.open_since = None;
            }
            CircuitState::HalfOpen => {
                state.half_open_requests = 0;
            }
        }

        Some((old_state, new_state, reason))
    }

    /// Logs, records metrics, and fires the state-change callback.
    fn report_transition(&self, event: Option<(CircuitState, CircuitState, &'static str)>) {
        let Some((old_state, new_state, reason)) = event else {
            return;
        };

        tracing::warn!(
            from = %old_state,
            to = %new_state,
            reason,
            "circuit breaker state change"
        );
        metrics::record_circuit_transition(old_state.as_str(), new_state.as_str());
        metrics::set_circuit_state(new_state.gauge_value());

        if let Some(callback) = &self.config.on_state_change {
            callback(old_state, new_state, reason);
        }
    }

    /// Records a successful authorizer call.
    pub fn record_success(&self) {
        let event = {
            let mut state = self.state.lock();
            state.last_success_time = Some(Instant::now());
            state.failure_count = 0;

            if state.state == CircuitState::HalfOpen {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    Self::transition_to(&mut state, CircuitState::Closed, "test_succeeded")
                } else {
                    None
                }
            } else {
                None
            }
        };
        self.report_transition(event);
    }

    /// Records a failed authorizer call.
    pub fn record_failure(&self, error: &AuthzError) {
        let event = {
            let mut state = self.state.lock();
            state.last_failure_time = Some(Instant::now());
            state.failure_count += 1;
            state.success_count = 0;

            tracing::warn!(
                failure_count = state.failure_count,
                error = %error,
                "circuit breaker recorded failure"
            );

            match state.state {
                CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                    Self::transition_to(&mut state, CircuitState::Open, "failure_threshold_exceeded")
                }
                CircuitState::HalfOpen => {
                    Self::transition_to(&mut state, CircuitState::Open, "test_failed")
                }
                _ => None,
            }
        };
        self.report_transition(event);
    }

    /// Whether a request should be allowed through to the authorizer.
    ///
    /// Returns `true` while closed, and for admitted probes while half-open.
    /// An open circuit transitions to half-open here once the recovery
    /// timeout has elapsed; that call consumes the first probe slot.
    pub fn should_allow_request(&self) -> bool {
        let (allowed, event) = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => (true, None),
                CircuitState::Open => {
                    let expired = state
                        .open_since
                        .is_some_and(|since| since.elapsed() >= self.config.recovery_timeout);
                    if expired {
                        let event = Self::transition_to(
                            &mut state,
                            CircuitState::HalfOpen,
                            "recovery_timeout_expired",
                        );
                        state.half_open_requests = 1;
                        (true, event)
                    } else {
                        (false, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if state.half_open_requests < self.config.half_open_max_requests {
                        state.half_open_requests += 1;
                        (true, None)
                    } else {
                        (false, None)
                    }
                }
            }
        };
        self.report_transition(event);
        allowed
    }

    /// Whether an error counts as a circuit breaker failure.
    #[must_use]
    pub fn is_failure_error(&self, error: &AuthzError) -> bool {
        (self.config.failure_classifier)(error)
    }

    /// Filters a stale decision through the breaker's stale-serving rules.
    ///
    /// Returns `None` when stale serving is disabled or the policy path
    /// matches a `no_stale_for` pattern.
    #[must_use]
    pub fn filter_stale(&self, policy_path: &str, stale: Option<bool>) -> Option<bool> {
        if !self.config.serve_stale_cache {
            return None;
        }
        if stale.is_some()
            && self
                .config
                .no_stale_for
                .iter()
                .any(|pattern| WildMatch::new(pattern).matches(policy_path))
        {
            return None;
        }
        stale
    }

    /// Produces the fallback decision when the circuit will not let a call
    /// through (or a failure-worthy error occurred).
    ///
    /// `stale_decision` must already have gone through [`filter_stale`].
    pub async fn get_fallback_decision(
        &self,
        request: &AuthRequest,
        policy_path: &str,
        resource_context: &ResourceContext,
        stale_decision: Option<bool>,
        error: &AuthzError,
    ) -> bool {
        let result = match &self.config.fallback {
            FallbackStrategy::Deny => false,
            FallbackStrategy::Allow => true,
            FallbackStrategy::CacheThenDeny => stale_decision.unwrap_or(false),
            FallbackStrategy::CacheThenAllow => stale_decision.unwrap_or(true),
            FallbackStrategy::Custom(decider) => {
                let ctx = FallbackContext {
                    request,
                    policy_path,
                    resource_context,
                    stale_decision,
                    error,
                };
                match decider.decide(ctx).await {
                    Ok(decision) => decision,
                    Err(err) => {
                        tracing::error!(error = %err, "custom fallback decider failed, denying");
                        false
                    }
                }
            }
        };

        if let Some(callback) = &self.config.on_fallback {
            callback(request, policy_path, stale_decision, result);
        }

        result
    }

    /// Forces the breaker back to closed with all counters zeroed.
    pub fn reset(&self) {
        let event = {
            let mut state = self.state.lock();
            let event = Self::transition_to(&mut state, CircuitState::Closed, "manual_reset");
            state.failure_count = 0;
            state.success_count = 0;
            state.last_failure_time = None;
            state.last_success_time = None;
            state.open_since = None;
            state.half_open_requests = 0;
            event
        };
        self.report_transition(event);
    }
}
