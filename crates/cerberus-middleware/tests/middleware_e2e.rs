//! End-to-end tests: route table + engine + global middleware + guards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cerberus_authz::testing::{FailureMode, MockAuthorizer};
use cerberus_authz::{AuthzEngine, AuthzError, HierarchyCheck, IdSource};
use cerberus_core::{AuthRequest, ResourceFetcher};
use cerberus_middleware::{
    AuthorizationMiddleware, AutoPolicyGuard, GuardOutcome, HeaderIdentityProvider,
    HierarchyGuard, ListFilter, Middleware, MiddlewareContext, MissingIdentityPolicy, Next,
    PolicyGuard, RelationGuard, Request, Response, ResourceGuard, RouteTable,
};
use http::{Method, StatusCode};
use http_body_util::Full;
use regex::Regex;

fn engine_with(mock: &MockAuthorizer) -> Arc<AuthzEngine> {
    Arc::new(
        AuthzEngine::builder("webapp", "webapp", Arc::new(HeaderIdentityProvider::new()))
            .with_transport_factory(Arc::new(mock.clone()))
            .build()
            .unwrap(),
    )
}

fn routes() -> Arc<RouteTable> {
    Arc::new(
        RouteTable::new()
            .route("GET", "/documents")
            .route("GET", "/documents/{id}")
            .route("DELETE", "/documents/{id}")
            .route_excluded("GET", "/health"),
    )
}

fn make_request(method: &str, uri: &str, user: Option<&str>) -> Request {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

/// Runs a request through the middleware into a handler that records
/// whether it executed.
async fn run(
    middleware: &AuthorizationMiddleware,
    request: Request,
) -> (Response, bool, MiddlewareContext) {
    let handler_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&handler_ran);

    let mut ctx = MiddlewareContext::new();
    let next = Next::handler(move |_ctx, _req| {
        flag.store(true, Ordering::SeqCst);
        Box::pin(async {
            http::Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("handled")))
                .unwrap()
        })
    });

    let response = middleware.process(&mut ctx, request, next).await;
    (response, handler_ran.load(Ordering::SeqCst), ctx)
}

#[tokio::test]
async fn test_allowed_request_reaches_handler() {
    let mock = MockAuthorizer::new();
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    let (response, ran, ctx) = run(
        &middleware,
        make_request("GET", "/documents/42", Some("alice")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(ran);
    // Path params and identity are attached for the handler
    assert_eq!(ctx.path_params()["id"], "42");
    assert_eq!(ctx.identity().value(), Some("alice"));
}

#[tokio::test]
async fn test_end_to_end_policy_path_and_context() {
    let mock = MockAuthorizer::new();
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    let _ = run(
        &middleware,
        make_request("GET", "/documents/42", Some("alice")),
    )
    .await;

    let recorded = mock.decisions();
    assert_eq!(recorded.len(), 1);
    // The pattern, not the literal path, names the policy
    assert_eq!(recorded[0].policy_path, "webapp.GET.documents.__id");
    assert_eq!(recorded[0].resource_context.get_str("id"), Some("42"));
    assert_eq!(recorded[0].identity_value.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_denied_request_never_reaches_handler() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    let (response, ran, _) = run(
        &middleware,
        make_request("DELETE", "/documents/42", Some("mallory")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!ran);
}

#[tokio::test]
async fn test_missing_identity_is_401() {
    let mock = MockAuthorizer::new();
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    let (response, ran, _) = run(&middleware, make_request("GET", "/documents", None)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!ran);
    // Rejected before any authorizer call
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_anonymous_policy_lets_the_authorizer_decide() {
    let mock = MockAuthorizer::new();
    let middleware =
        AuthorizationMiddleware::builder(engine_with(&mock), routes())
            .on_missing_identity(MissingIdentityPolicy::Anonymous)
            .build();

    let (response, ran, _) = run(&middleware, make_request("GET", "/documents", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(ran);
    assert_eq!(mock.calls(), 1);
    // The wire carries no identity value for anonymous requests
    assert_eq!(mock.decisions()[0].identity_value, None);
}

#[tokio::test]
async fn test_excluded_method_passes_through() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let routes = Arc::new(RouteTable::new().route("OPTIONS", "/documents"));
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes);

    let (response, ran, _) = run(&middleware, make_request("OPTIONS", "/documents", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(ran);
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_exclude_path_regex() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let middleware = AuthorizationMiddleware::builder(engine_with(&mock), routes())
        .exclude_path(Regex::new(r"^/documents$").unwrap())
        .build();

    let (response, ran, _) = run(&middleware, make_request("GET", "/documents", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(ran);

    // Non-matching paths are still protected
    let (response, ran, _) = run(
        &middleware,
        make_request("GET", "/documents/42", Some("alice")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!ran);
}

#[tokio::test]
async fn test_route_skip_marker_passes_through() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    let (response, ran, _) = run(&middleware, make_request("GET", "/health", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(ran);
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_unmatched_route_passes_through() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    // No route matches; the router downstream produces its own 404
    let (response, ran, _) = run(&middleware, make_request("GET", "/unknown", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(ran);
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_middleware_fails_closed_on_transport_error() {
    let mock = MockAuthorizer::new();
    mock.fail_with(FailureMode::Connect);
    // No circuit breaker configured: the middleware still answers 403
    let middleware = AuthorizationMiddleware::new(engine_with(&mock), routes());

    let (response, ran, _) = run(
        &middleware,
        make_request("GET", "/documents", Some("alice")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!ran);
}

#[tokio::test]
async fn test_custom_denial_response() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let middleware = AuthorizationMiddleware::builder(engine_with(&mock), routes())
        .on_denied(Arc::new(|_request: &AuthRequest, policy_path: &str| {
            http::Response::builder()
                .status(StatusCode::FORBIDDEN)
                .header("x-denied-policy", policy_path)
                .body(Full::new(Bytes::from("nope")))
                .unwrap()
        }))
        .build();

    let (response, _, _) = run(
        &middleware,
        make_request("GET", "/documents", Some("alice")),
    )
    .await;

    assert_eq!(
        response.headers().get("x-denied-policy").unwrap(),
        "webapp.GET.documents"
    );
}

// Guard tests

fn auth_request(method: &str, uri: &str, user: Option<&str>, route: Option<(&str, &[(&str, &str)])>) -> AuthRequest {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let (parts, ()) = builder.body(()).unwrap().into_parts();
    let request = AuthRequest::new(parts);
    match route {
        Some((pattern, params)) => request.with_route(
            pattern,
            params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        ),
        None => request,
    }
}

#[tokio::test]
async fn test_policy_guard() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_policy("webapp.POST.documents");
    let engine = engine_with(&mock);

    let guard = PolicyGuard::new(Arc::clone(&engine), "webapp.POST.documents");
    let request = auth_request("POST", "/documents", Some("alice"), None);
    assert_eq!(guard.evaluate(&request).await.unwrap(), GuardOutcome::Allowed);

    let guard = PolicyGuard::new(engine, "webapp.DELETE.documents");
    let outcome = guard.evaluate(&request).await.unwrap();
    assert!(matches!(outcome, GuardOutcome::Denied { .. }));
}

#[tokio::test]
async fn test_auto_policy_guard_derives_from_route() {
    let mock = MockAuthorizer::new();
    let engine = engine_with(&mock);

    let guard = AutoPolicyGuard::new(engine);
    let request = auth_request(
        "GET",
        "/documents/42",
        Some("alice"),
        Some(("/documents/{id}", &[("id", "42")])),
    );
    assert_eq!(guard.evaluate(&request).await.unwrap(), GuardOutcome::Allowed);
    assert_eq!(mock.decisions()[0].policy_path, "webapp.GET.documents.__id");
}

#[tokio::test]
async fn test_auto_policy_guard_without_route_is_config_error() {
    let mock = MockAuthorizer::new();
    let guard = AutoPolicyGuard::new(engine_with(&mock));

    let request = auth_request("GET", "/documents/42", Some("alice"), None);
    let result = guard.evaluate(&request).await;
    assert!(matches!(result, Err(AuthzError::Config(_))));
    // No decision was faked from a guessed policy path
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_guard_propagates_transport_error_without_breaker() {
    let mock = MockAuthorizer::new();
    mock.fail_with(FailureMode::Connect);
    let guard = PolicyGuard::new(engine_with(&mock), "webapp.GET.documents");

    let request = auth_request("GET", "/documents", Some("alice"), None);
    let result = guard.evaluate(&request).await;
    assert!(matches!(result, Err(AuthzError::Connect(_))));
}

#[tokio::test]
async fn test_relation_guard_defaults_to_id_param() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation_for_objects("document", "can_write", &["42"]);
    let engine = engine_with(&mock);

    let guard = RelationGuard::new(engine, "document", "can_write");
    let request = auth_request(
        "PUT",
        "/documents/42",
        Some("alice"),
        Some(("/documents/{id}", &[("id", "42")])),
    );
    assert_eq!(guard.evaluate(&request).await.unwrap(), GuardOutcome::Allowed);
    assert_eq!(mock.decisions()[0].policy_path, "webapp.check");
}

#[tokio::test]
async fn test_relation_guard_with_header_source() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation_for_objects("organization", "member", &["org-7"]);
    let engine = engine_with(&mock);

    let guard = RelationGuard::new(engine, "organization", "member")
        .with_object_id(IdSource::parse("header:x-org-id"));

    let mut builder = http::Request::builder().method("GET").uri("/reports");
    builder = builder.header("x-user-id", "alice").header("x-org-id", "org-7");
    let (parts, ()) = builder.body(()).unwrap().into_parts();
    let request = AuthRequest::new(parts);

    assert_eq!(guard.evaluate(&request).await.unwrap(), GuardOutcome::Allowed);
}

#[derive(Debug, Clone, PartialEq)]
struct Document {
    id: u32,
    title: String,
}

struct DocumentStore;

impl ResourceFetcher<Document> for DocumentStore {
    fn fetch<'a>(
        &'a self,
        request: &'a AuthRequest,
    ) -> cerberus_core::BoxFuture<'a, Option<Document>> {
        Box::pin(async move {
            match request.path_param("id") {
                Some("42") => Some(Document {
                    id: 42,
                    title: "quarterly report".to_string(),
                }),
                _ => None,
            }
        })
    }
}

#[tokio::test]
async fn test_resource_guard_returns_resource() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("document", "can_read");
    let engine = engine_with(&mock);

    let guard = ResourceGuard::new(engine, Arc::new(DocumentStore), "document", "can_read");
    let request = auth_request(
        "GET",
        "/documents/42",
        Some("alice"),
        Some(("/documents/{id}", &[("id", "42")])),
    );

    let document = guard.evaluate(&request).await.unwrap().unwrap();
    assert_eq!(document.id, 42);
}

#[tokio::test]
async fn test_resource_guard_missing_resource_is_404() {
    let mock = MockAuthorizer::new();
    let engine = engine_with(&mock);

    let guard = ResourceGuard::new(engine, Arc::new(DocumentStore), "document", "can_read");
    let request = auth_request(
        "GET",
        "/documents/7",
        Some("alice"),
        Some(("/documents/{id}", &[("id", "7")])),
    );

    let outcome = guard.evaluate(&request).await.unwrap().unwrap_err();
    assert_eq!(
        outcome,
        GuardOutcome::NotFound {
            what: "document".to_string()
        }
    );
    // 404 is decided before any authorization check
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_resource_guard_forbidden_is_403_not_404() {
    let mock = MockAuthorizer::new().with_default_decision(false);
    let engine = engine_with(&mock);

    let guard = ResourceGuard::new(engine, Arc::new(DocumentStore), "document", "can_write");
    let request = auth_request(
        "PUT",
        "/documents/42",
        Some("alice"),
        Some(("/documents/{id}", &[("id", "42")])),
    );

    let outcome = guard.evaluate(&request).await.unwrap().unwrap_err();
    assert!(matches!(outcome, GuardOutcome::Denied { .. }));
}

#[tokio::test]
async fn test_list_filter_keeps_authorized_subset_in_order() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation_for_objects("document", "can_read", &["1", "3"]);
    let engine = engine_with(&mock);

    let filter = ListFilter::new(engine, "document", "can_read");
    let request = auth_request("GET", "/documents", Some("alice"), None);

    let docs = vec![
        Document { id: 1, title: "a".to_string() },
        Document { id: 2, title: "b".to_string() },
        Document { id: 3, title: "c".to_string() },
    ];
    let visible = filter
        .filter(&request, docs, |doc| doc.id.to_string())
        .await
        .unwrap();

    assert_eq!(visible.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 3]);
}

#[tokio::test]
async fn test_hierarchy_guard_denial_names_the_level() {
    let mock = MockAuthorizer::new()
        .with_default_decision(false)
        .allow_relation("organization", "member");
    let engine = engine_with(&mock);

    let guard = HierarchyGuard::new(
        engine,
        vec![
            HierarchyCheck::new("organization", "org_id", "member"),
            HierarchyCheck::new("document", "doc_id", "can_read"),
        ],
    );

    let request = auth_request(
        "GET",
        "/orgs/org-1/docs/42",
        Some("alice"),
        Some((
            "/orgs/{org_id}/docs/{doc_id}",
            &[("org_id", "org-1"), ("doc_id", "42")],
        )),
    );

    let outcome = guard.evaluate(&request).await.unwrap();
    assert_eq!(
        outcome,
        GuardOutcome::Denied {
            reason: "access denied at document".to_string()
        }
    );
}
