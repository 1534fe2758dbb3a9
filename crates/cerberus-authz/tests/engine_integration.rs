//! End-to-end tests for the decision pipeline: engine + cache + circuit
//! breaker + pool, with a programmable in-memory authorizer.

use std::sync::Arc;

use cerberus_authz::testing::{FailureMode, MockAuthorizer};
use cerberus_authz::{
    AuthzEngine, AuthzError, BreakerConfig, CacheConfig, CircuitBreaker, CircuitState,
    ConnectionPool, DecisionCache, FallbackStrategy, HierarchyCheck, HierarchyMode, PoolConfig,
};
use cerberus_core::{AuthRequest, Identity, IdentityProvider, ResourceContext};
use tokio::time::Duration;

fn subject_provider(value: &str) -> Arc<dyn IdentityProvider> {
    let value = value.to_string();
    Arc::new(move |_req: &AuthRequest| Identity::subject(value.clone()))
}

fn header_provider() -> Arc<dyn IdentityProvider> {
    Arc::new(|req: &AuthRequest| {
        req.header("x-user-id")
            .map_or(Identity::anonymous(), Identity::subject)
    })
}

fn make_request(method: &str, uri: &str) -> AuthRequest {
    let request = http::Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .unwrap();
    let (parts, ()) = request.into_parts();
    AuthRequest::new(parts)
}

fn engine_with(mock: &MockAuthorizer) -> AuthzEngine {
    AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_check_decision_allowed_and_denied() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_policy("webapp.GET.*");
    let engine = engine_with(&mock);
    let request = make_request("GET", "/documents");

    let allowed = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(allowed);

    let denied = engine
        .check_decision(
            &request,
            "webapp.DELETE.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(!denied);
}

#[tokio::test]
async fn test_cache_avoids_second_authorizer_call() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_cache(DecisionCache::new(CacheConfig::default()))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    for _ in 0..3 {
        let allowed = engine
            .check_decision(
                &request,
                "webapp.GET.documents",
                "allowed",
                ResourceContext::new(),
                "guard",
            )
            .await
            .unwrap();
        assert!(allowed);
    }

    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_differing_context_is_a_different_cache_key() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_cache(DecisionCache::new(CacheConfig::default()))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    let mut ctx_a = ResourceContext::new();
    ctx_a.insert("id", "1");
    let mut ctx_b = ResourceContext::new();
    ctx_b.insert("id", "2");

    for ctx in [ctx_a, ctx_b] {
        engine
            .check_decision(&request, "webapp.GET.documents", "allowed", ctx, "guard")
            .await
            .unwrap();
    }
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_identity_provider_feeds_the_wire_request() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", header_provider())
        .with_transport_factory(Arc::new(mock.clone()))
        .build()
        .unwrap();

    let request = http::Request::builder()
        .method("GET")
        .uri("/documents")
        .header("x-user-id", "alice")
        .body(())
        .unwrap();
    let (parts, ()) = request.into_parts();
    let request = AuthRequest::new(parts);

    engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();

    let recorded = mock.decisions();
    assert_eq!(recorded[0].identity_value.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_breaker_trips_after_consecutive_failures() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_circuit_breaker(CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            fallback: FallbackStrategy::Deny,
            ..Default::default()
        }))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    mock.fail_with(FailureMode::Connect);
    for _ in 0..3 {
        // Failure-worthy errors resolve to the fallback, not an Err
        let allowed = engine
            .check_decision(
                &request,
                "webapp.GET.documents",
                "allowed",
                ResourceContext::new(),
                "guard",
            )
            .await
            .unwrap();
        assert!(!allowed);
    }

    assert_eq!(
        engine.circuit_breaker().unwrap().state(),
        CircuitState::Open
    );

    // With the circuit open no further network call is attempted
    let calls_before = mock.calls();
    let allowed = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(!allowed);
    assert_eq!(mock.calls(), calls_before);
}

#[tokio::test]
async fn test_open_circuit_serves_stale_decisions() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_circuit_breaker(CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            fallback: FallbackStrategy::CacheThenDeny,
            ..Default::default()
        }))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    // A successful call seeds the stale side table
    let allowed = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(allowed);

    // Trip the breaker
    mock.fail_with(FailureMode::Connect);
    let stale_served = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    // The stale `true` from before the outage is served
    assert!(stale_served);

    // A key that was never cached falls back to deny
    let unknown = engine
        .check_decision(
            &request,
            "webapp.GET.folders",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(!unknown);
}

#[tokio::test]
async fn test_no_stale_for_excludes_sensitive_paths() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_circuit_breaker(CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            fallback: FallbackStrategy::CacheThenDeny,
            no_stale_for: vec!["*.admin.*".to_string()],
            ..Default::default()
        }))
        .build()
        .unwrap();
    let request = make_request("POST", "/admin/users");

    let allowed = engine
        .check_decision(
            &request,
            "webapp.admin.users",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(allowed);

    mock.fail_with(FailureMode::Connect);
    // The stale `true` exists but the pattern forbids serving it
    let fallback = engine
        .check_decision(
            &request,
            "webapp.admin.users",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(!fallback);
}

#[tokio::test]
async fn test_error_propagates_without_breaker() {
    let mock = MockAuthorizer::new();
    let engine = engine_with(&mock);
    let request = make_request("GET", "/documents");

    mock.fail_with(FailureMode::Connect);
    let result = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await;
    assert!(matches!(result, Err(AuthzError::Connect(_))));
}

#[tokio::test]
async fn test_non_failure_error_propagates_despite_breaker() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_circuit_breaker(CircuitBreaker::default())
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    // HTTP 500 is not a transient connection failure under the default
    // classifier, so it passes through the breaker untouched
    mock.fail_with(FailureMode::ServerError);
    let result = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await;
    assert!(matches!(result, Err(AuthzError::Status { status: 500, .. })));
    assert_eq!(
        engine.circuit_breaker().unwrap().state(),
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open() {
    let mock = MockAuthorizer::new();
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_circuit_breaker(CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            fallback: FallbackStrategy::Deny,
            ..Default::default()
        }))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    mock.fail_with(FailureMode::Connect);
    let _ = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert_eq!(engine.circuit_breaker().unwrap().state(), CircuitState::Open);

    mock.recover();
    tokio::time::advance(Duration::from_secs(31)).await;

    let allowed = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert!(allowed);
    assert_eq!(
        engine.circuit_breaker().unwrap().state(),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_pooled_calls_reuse_connections() {
    let mock = MockAuthorizer::new();
    let pool = Arc::new(ConnectionPool::new(PoolConfig {
        min_connections: 1,
        max_connections: 2,
        idle_check_interval: Duration::ZERO,
        ..Default::default()
    }));
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_connection_pool(Arc::clone(&pool))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    for _ in 0..5 {
        engine
            .check_decision(
                &request,
                "webapp.GET.documents",
                "allowed",
                ResourceContext::new(),
                "guard",
            )
            .await
            .unwrap();
    }

    // Sequential checks reuse one pooled connection
    assert_eq!(mock.connects(), 1);
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_transient_failure_discards_pooled_connection() {
    let mock = MockAuthorizer::new();
    let pool = Arc::new(ConnectionPool::new(PoolConfig {
        min_connections: 0,
        max_connections: 2,
        idle_check_interval: Duration::ZERO,
        ..Default::default()
    }));
    let engine = AuthzEngine::builder("webapp", "webapp", subject_provider("user-123"))
        .with_transport_factory(Arc::new(mock.clone()))
        .with_connection_pool(Arc::clone(&pool))
        .build()
        .unwrap();
    let request = make_request("GET", "/documents");

    mock.fail_times(FailureMode::Connect, 1);
    let _ = engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await;

    // The failed connection was not returned to the pool
    assert_eq!(pool.status().total, 0);

    engine
        .check_decision(
            &request,
            "webapp.GET.documents",
            "allowed",
            ResourceContext::new(),
            "guard",
        )
        .await
        .unwrap();
    assert_eq!(mock.connects(), 2);
}

#[tokio::test]
async fn test_check_relation_builds_rebac_context() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation_for_objects("document", "can_write", &["42"]);
    let engine = engine_with(&mock);
    let request = make_request("PUT", "/documents/42");

    let allowed = engine
        .check_relation(&request, "document", "42", "can_write", "user")
        .await
        .unwrap();
    assert!(allowed);

    let recorded = mock.decisions();
    assert_eq!(recorded[0].policy_path, "webapp.check");
    assert_eq!(recorded[0].object_type.as_deref(), Some("document"));
    assert_eq!(recorded[0].relation.as_deref(), Some("can_write"));
    assert_eq!(
        recorded[0].resource_context.get_str("subject_type"),
        Some("user")
    );
}

#[tokio::test]
async fn test_check_relations_returns_ordered_map() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("document", "can_read")
        .allow_relation("document", "can_write");
    let engine = engine_with(&mock);
    let request = make_request("GET", "/documents/42");

    let results = engine
        .check_relations(
            &request,
            "document",
            "42",
            &["can_read", "can_write", "can_delete", "can_share"],
            "user",
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results["can_read"], true);
    assert_eq!(results["can_write"], true);
    assert_eq!(results["can_delete"], false);
    assert_eq!(results["can_share"], false);
}

#[tokio::test]
async fn test_hierarchy_all_mode() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("organization", "member")
        .allow_relation("document", "can_read");
    let engine = engine_with(&mock);
    let request = {
        let r = http::Request::builder()
            .method("GET")
            .uri("/orgs/org-1/docs/42")
            .body(())
            .unwrap();
        let (parts, ()) = r.into_parts();
        AuthRequest::new(parts).with_route(
            "/orgs/{org_id}/docs/{doc_id}",
            [
                ("org_id".to_string(), "org-1".to_string()),
                ("doc_id".to_string(), "42".to_string()),
            ],
        )
    };

    let checks = vec![
        HierarchyCheck::new("organization", "org_id", "member"),
        HierarchyCheck::new("document", "doc_id", "can_read"),
    ];

    let result = engine
        .check_hierarchy(&request, &checks, HierarchyMode::All, "user", true)
        .await
        .unwrap();
    assert!(result.allowed);
    assert_eq!(result.checks.len(), 2);
    assert_eq!(result.as_map()["organization"], true);

    // Sequential evaluation short-circuits on the first denial
    let checks_denied = vec![
        HierarchyCheck::new("organization", "org_id", "member"),
        HierarchyCheck::new("document", "doc_id", "can_delete"),
    ];
    let result = engine
        .check_hierarchy(&request, &checks_denied, HierarchyMode::All, "user", false)
        .await
        .unwrap();
    assert!(!result.allowed);
    assert_eq!(result.denied_at.as_deref(), Some("document"));
}

#[tokio::test]
async fn test_hierarchy_all_concurrent_reports_first_denial_in_input_order() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("document", "can_read");
    let engine = engine_with(&mock);
    let request = make_request("GET", "/x");

    let checks = vec![
        HierarchyCheck::new("organization", "static:org-1", "member"),
        HierarchyCheck::new("project", "static:p-1", "viewer"),
        HierarchyCheck::new("document", "static:42", "can_read"),
    ];

    let result = engine
        .check_hierarchy(&request, &checks, HierarchyMode::All, "user", true)
        .await
        .unwrap();
    assert!(!result.allowed);
    // Both organization and project failed; input order picks the first
    assert_eq!(result.denied_at.as_deref(), Some("organization"));
    // Concurrent mode still evaluated every check
    assert_eq!(result.checks.len(), 3);
}

#[tokio::test]
async fn test_hierarchy_any_mode() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("organization", "member");
    let engine = engine_with(&mock);
    let request = make_request("GET", "/x");

    let checks = vec![
        HierarchyCheck::new("organization", "static:org-1", "member"),
        HierarchyCheck::new("document", "static:42", "can_read"),
    ];

    let result = engine
        .check_hierarchy(&request, &checks, HierarchyMode::Any, "user", true)
        .await
        .unwrap();
    assert!(result.allowed);
}

#[tokio::test]
async fn test_hierarchy_first_match_short_circuits() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("document", "owner");
    let engine = engine_with(&mock);
    let request = make_request("GET", "/x");

    let checks = vec![
        HierarchyCheck::new("document", "static:42", "owner"),
        HierarchyCheck::new("document", "static:42", "can_read"),
    ];

    let result = engine
        .check_hierarchy(&request, &checks, HierarchyMode::FirstMatch, "user", true)
        .await
        .unwrap();
    assert!(result.allowed);
    assert_eq!(result.first_match.as_deref(), Some("owner"));
    // Short-circuited: only the first check ran
    assert_eq!(result.checks.len(), 1);
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_filter_authorized_preserves_order() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation_for_objects("document", "can_read", &["1", "3"]);
    let engine = engine_with(&mock);
    let request = make_request("GET", "/documents");

    #[derive(Debug, PartialEq)]
    struct Doc {
        id: u32,
    }

    let docs = vec![Doc { id: 1 }, Doc { id: 2 }, Doc { id: 3 }, Doc { id: 4 }];
    let visible = engine
        .filter_authorized(
            &request,
            docs,
            "document",
            "can_read",
            |doc| doc.id.to_string(),
            "user",
        )
        .await
        .unwrap();

    assert_eq!(visible, vec![Doc { id: 1 }, Doc { id: 3 }]);
}

#[tokio::test]
async fn test_is_allowed_merges_path_params() {
    let mock = MockAuthorizer::new();
    let engine = engine_with(&mock);
    let request = {
        let r = http::Request::builder()
            .method("GET")
            .uri("/documents/42")
            .body(())
            .unwrap();
        let (parts, ()) = r.into_parts();
        AuthRequest::new(parts)
            .with_route("/documents/{id}", [("id".to_string(), "42".to_string())])
    };

    let mut static_ctx = ResourceContext::new();
    static_ctx.insert("tenant", "acme");
    engine
        .is_allowed(&request, "webapp.GET.documents.__id", Some(static_ctx))
        .await
        .unwrap();

    let recorded = mock.decisions();
    assert_eq!(recorded[0].resource_context.get_str("id"), Some("42"));
    assert_eq!(recorded[0].resource_context.get_str("tenant"), Some("acme"));
}

#[tokio::test]
async fn test_policy_path_for_preview() {
    let mock = MockAuthorizer::new();
    let engine = engine_with(&mock);
    assert_eq!(
        engine.policy_path_for("GET", "/documents/{id}"),
        "webapp.GET.documents.__id"
    );
    assert_eq!(engine.policy_path_for("GET", "/"), "webapp.GET");
}
