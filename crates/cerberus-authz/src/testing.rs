//! Test support: a programmable in-memory authorizer.
//!
//! [`MockAuthorizer`] stands in for the remote authorizer in tests. It
//! implements both [`DecisionClient`] and [`TransportFactory`], so it can
//! be handed to the engine directly or through a pool. Rules are matched
//! with glob patterns and evaluated most-specific-first (declaration
//! order); the default decision applies when nothing matches.
//!
//! ```
//! use cerberus_authz::testing::MockAuthorizer;
//!
//! let mock = MockAuthorizer::new()
//!     .with_default_decision(false)
//!     .allow_policy("webapp.GET.*")
//!     .allow_relation("document", "can_read");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cerberus_core::{BoxFuture, ResourceContext};
use parking_lot::Mutex;
use wildmatch::WildMatch;

use crate::error::{AuthzError, AuthzResult};
use crate::transport::{DecisionClient, DecisionRequest, TransportFactory};

/// A recorded authorization decision, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedDecision {
    /// Policy path that was checked.
    pub policy_path: String,
    /// Decision name that was evaluated.
    pub decision_name: String,
    /// The verdict returned.
    pub allowed: bool,
    /// Identity value on the request, if any.
    pub identity_value: Option<String>,
    /// The resource context sent with the check.
    pub resource_context: ResourceContext,
    /// `policy` or `rebac`.
    pub check_type: String,
    /// ReBAC object type, when present in the context.
    pub object_type: Option<String>,
    /// ReBAC object id, when present in the context.
    pub object_id: Option<String>,
    /// ReBAC relation, when present in the context.
    pub relation: Option<String>,
}

/// How an injected failure presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Connection refused.
    Connect,
    /// Call timed out.
    Timeout,
    /// Authorizer returned HTTP 500.
    ServerError,
}

impl FailureMode {
    fn to_error(self) -> AuthzError {
        match self {
            Self::Connect => AuthzError::connect("mock: connection refused"),
            Self::Timeout => AuthzError::timeout("mock: deadline exceeded"),
            Self::ServerError => AuthzError::Status {
                status: 500,
                message: "mock: internal error".to_string(),
            },
        }
    }
}

type DecisionFn = Arc<dyn Fn(&ResourceContext) -> bool + Send + Sync>;

#[derive(Clone)]
enum RuleDecision {
    Fixed(bool),
    Dynamic(DecisionFn),
}

impl RuleDecision {
    fn evaluate(&self, ctx: &ResourceContext) -> bool {
        match self {
            Self::Fixed(value) => *value,
            Self::Dynamic(f) => f(ctx),
        }
    }
}

#[derive(Clone)]
struct PolicyRule {
    pattern: String,
    decision: RuleDecision,
    users: Option<Vec<String>>,
}

impl PolicyRule {
    fn matches(&self, policy_path: &str, identity_value: Option<&str>) -> bool {
        if !WildMatch::new(&self.pattern).matches(policy_path) {
            return false;
        }
        match &self.users {
            Some(users) => identity_value.is_some_and(|v| users.iter().any(|u| u == v)),
            None => true,
        }
    }
}

#[derive(Clone)]
struct RelationRule {
    object_type: String,
    relation: String,
    decision: RuleDecision,
    users: Option<Vec<String>>,
    object_ids: Option<Vec<String>>,
}

impl RelationRule {
    fn matches(
        &self,
        object_type: &str,
        relation: &str,
        object_id: Option<&str>,
        identity_value: Option<&str>,
    ) -> bool {
        if !WildMatch::new(&self.object_type).matches(object_type) {
            return false;
        }
        if !WildMatch::new(&self.relation).matches(relation) {
            return false;
        }
        if let Some(users) = &self.users {
            if !identity_value.is_some_and(|v| users.iter().any(|u| u == v)) {
                return false;
            }
        }
        if let Some(ids) = &self.object_ids {
            if !object_id.is_some_and(|id| ids.iter().any(|i| i == id)) {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct MockState {
    policy_rules: Vec<PolicyRule>,
    relation_rules: Vec<RelationRule>,
    failure: Option<(FailureMode, Option<usize>)>,
    decisions: Vec<RecordedDecision>,
}

/// A programmable in-memory authorizer for tests.
///
/// Cheap to clone; clones share rules, failure state, and the decision log.
#[derive(Clone)]
pub struct MockAuthorizer {
    default_decision: bool,
    state: Arc<Mutex<MockState>>,
    connects: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthorizer {
    /// Creates a mock that allows everything by default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_decision: true,
            state: Arc::new(Mutex::new(MockState::default())),
            connects: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the verdict returned when no rule matches.
    #[must_use]
    pub fn with_default_decision(mut self, decision: bool) -> Self {
        self.default_decision = decision;
        self
    }

    /// Allows policy paths matching a glob pattern.
    #[must_use]
    pub fn allow_policy(self, pattern: &str) -> Self {
        self.add_policy_rule(pattern, RuleDecision::Fixed(true), None)
    }

    /// Denies policy paths matching a glob pattern.
    #[must_use]
    pub fn deny_policy(self, pattern: &str) -> Self {
        self.add_policy_rule(pattern, RuleDecision::Fixed(false), None)
    }

    /// Allows policy paths matching a pattern, but only for the given users.
    #[must_use]
    pub fn allow_policy_for_users(self, pattern: &str, users: &[&str]) -> Self {
        let users = users.iter().map(ToString::to_string).collect();
        self.add_policy_rule(pattern, RuleDecision::Fixed(true), Some(users))
    }

    /// Decides policy paths matching a pattern with a predicate over the
    /// resource context.
    #[must_use]
    pub fn policy_when(
        self,
        pattern: &str,
        predicate: impl Fn(&ResourceContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.add_policy_rule(pattern, RuleDecision::Dynamic(Arc::new(predicate)), None)
    }

    fn add_policy_rule(
        self,
        pattern: &str,
        decision: RuleDecision,
        users: Option<Vec<String>>,
    ) -> Self {
        self.state.lock().policy_rules.push(PolicyRule {
            pattern: pattern.to_string(),
            decision,
            users,
        });
        self
    }

    /// Allows a relation on an object type (both accept glob patterns).
    #[must_use]
    pub fn allow_relation(self, object_type: &str, relation: &str) -> Self {
        self.add_relation_rule(object_type, relation, RuleDecision::Fixed(true), None, None)
    }

    /// Denies a relation on an object type.
    #[must_use]
    pub fn deny_relation(self, object_type: &str, relation: &str) -> Self {
        self.add_relation_rule(object_type, relation, RuleDecision::Fixed(false), None, None)
    }

    /// Allows a relation only for specific object ids.
    #[must_use]
    pub fn allow_relation_for_objects(
        self,
        object_type: &str,
        relation: &str,
        object_ids: &[&str],
    ) -> Self {
        let ids = object_ids.iter().map(ToString::to_string).collect();
        self.add_relation_rule(
            object_type,
            relation,
            RuleDecision::Fixed(true),
            None,
            Some(ids),
        )
    }

    /// Allows a relation only for specific users.
    #[must_use]
    pub fn allow_relation_for_users(
        self,
        object_type: &str,
        relation: &str,
        users: &[&str],
    ) -> Self {
        let users = users.iter().map(ToString::to_string).collect();
        self.add_relation_rule(
            object_type,
            relation,
            RuleDecision::Fixed(true),
            Some(users),
            None,
        )
    }

    fn add_relation_rule(
        self,
        object_type: &str,
        relation: &str,
        decision: RuleDecision,
        users: Option<Vec<String>>,
        object_ids: Option<Vec<String>>,
    ) -> Self {
        self.state.lock().relation_rules.push(RelationRule {
            object_type: object_type.to_string(),
            relation: relation.to_string(),
            decision,
            users,
            object_ids,
        });
        self
    }

    /// Makes every subsequent call fail with the given mode.
    pub fn fail_with(&self, mode: FailureMode) {
        self.state.lock().failure = Some((mode, None));
    }

    /// Makes the next `count` calls fail, then recover.
    pub fn fail_times(&self, mode: FailureMode, count: usize) {
        self.state.lock().failure = Some((mode, Some(count)));
    }

    /// Clears any injected failure.
    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Number of decide calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of connections created through the factory.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// All recorded decisions.
    #[must_use]
    pub fn decisions(&self) -> Vec<RecordedDecision> {
        self.state.lock().decisions.clone()
    }

    /// Recorded decisions matching a predicate.
    #[must_use]
    pub fn find_decisions(
        &self,
        predicate: impl Fn(&RecordedDecision) -> bool,
    ) -> Vec<RecordedDecision> {
        self.state
            .lock()
            .decisions
            .iter()
            .filter(|d| predicate(d))
            .cloned()
            .collect()
    }

    /// Clears recorded decisions.
    pub fn clear_decisions(&self) {
        self.state.lock().decisions.clear();
    }

    fn evaluate(
        &self,
        policy_path: &str,
        identity_value: Option<&str>,
        ctx: &ResourceContext,
    ) -> (bool, String) {
        let state = self.state.lock();

        let object_type = ctx.get_str("object_type");
        let relation = ctx.get_str("relation");
        if let (Some(object_type), Some(relation)) = (object_type, relation) {
            let object_id = ctx.get_str("object_id");
            for rule in &state.relation_rules {
                if rule.matches(object_type, relation, object_id, identity_value) {
                    return (rule.decision.evaluate(ctx), "rebac".to_string());
                }
            }
            return (self.default_decision, "rebac".to_string());
        }

        for rule in &state.policy_rules {
            if rule.matches(policy_path, identity_value) {
                return (rule.decision.evaluate(ctx), "policy".to_string());
            }
        }
        (self.default_decision, "policy".to_string())
    }
}

impl DecisionClient for MockAuthorizer {
    fn decide<'a>(
        &'a self,
        request: DecisionRequest,
    ) -> BoxFuture<'a, AuthzResult<HashMap<String, bool>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            {
                let mut state = self.state.lock();
                if let Some((mode, remaining)) = state.failure {
                    match remaining {
                        Some(0) => state.failure = None,
                        Some(n) => {
                            state.failure = Some((mode, Some(n - 1)));
                            return Err(mode.to_error());
                        }
                        None => return Err(mode.to_error()),
                    }
                }
            }

            let identity_value = request.identity.value().map(String::from);
            let (allowed, check_type) = self.evaluate(
                &request.policy_path,
                identity_value.as_deref(),
                &request.resource_context,
            );

            {
                let ctx = &request.resource_context;
                self.state.lock().decisions.push(RecordedDecision {
                    policy_path: request.policy_path.clone(),
                    decision_name: request.decisions.first().cloned().unwrap_or_default(),
                    allowed,
                    identity_value,
                    resource_context: ctx.clone(),
                    check_type,
                    object_type: ctx.get_str("object_type").map(String::from),
                    object_id: ctx.get_str("object_id").map(String::from),
                    relation: ctx.get_str("relation").map(String::from),
                });
            }

            Ok(request
                .decisions
                .iter()
                .map(|name| (name.clone(), allowed))
                .collect())
        })
    }
}

impl TransportFactory for MockAuthorizer {
    fn connect(&self) -> AuthzResult<Arc<dyn DecisionClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}
