//! Common HTTP types used throughout the middleware layer.

use bytes::Bytes;
use cerberus_core::AuthRequest;
use http_body_util::Full;

use crate::routes::RouteMatch;

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building error responses.
pub trait ResponseExt {
    /// Creates a JSON error response.
    fn json_error(status: http::StatusCode, code: &str, message: &str) -> Response;
}

impl ResponseExt for Response {
    fn json_error(status: http::StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });

        http::Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("failed to build JSON error response")
    }
}

/// Builds the [`AuthRequest`] view of an incoming request, attaching the
/// matched route when one is available.
#[must_use]
pub fn auth_request_from(request: &Request, route: Option<&RouteMatch>) -> AuthRequest {
    let mut head = http::Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .body(())
        .expect("failed to rebuild request head");
    *head.headers_mut() = request.headers().clone();
    let (parts, ()) = head.into_parts();

    let auth = AuthRequest::new(parts);
    match route {
        Some(route) => auth.with_route(route.pattern.clone(), route.params.clone()),
        None => auth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_json_error_response() {
        let response = Response::json_error(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "access denied: webapp.GET.documents",
        );
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_auth_request_carries_headers_and_route() {
        let request: Request = http::Request::builder()
            .method("GET")
            .uri("/documents/42")
            .header("x-user-id", "alice")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let route = RouteMatch {
            pattern: "/documents/{id}".to_string(),
            params: [("id".to_string(), "42".to_string())].into_iter().collect(),
            skip_authorization: false,
        };

        let auth = auth_request_from(&request, Some(&route));
        assert_eq!(auth.header("x-user-id"), Some("alice"));
        assert_eq!(auth.route_pattern(), Some("/documents/{id}"));
        assert_eq!(auth.path_param("id"), Some("42"));
    }
}
