//! The request view that authorization checks operate on.
//!
//! Guards and the engine never see the framework's full request type; they
//! see an [`AuthRequest`]: the immutable head of the request (method, URI,
//! headers) plus whatever the router matched (route pattern and path
//! parameters). This keeps the engine independent of any particular HTTP
//! server while still giving id-source resolution everything it needs.

use std::collections::BTreeMap;

use http::request::Parts;
use http::{HeaderMap, Method, Uri};

/// The slice of an HTTP request that authorization checks can see.
///
/// # Example
///
/// ```
/// use cerberus_core::AuthRequest;
///
/// let request = http::Request::builder()
///     .method("GET")
///     .uri("/documents/42?expand=meta")
///     .body(())
///     .unwrap();
/// let (parts, ()) = request.into_parts();
///
/// let auth = AuthRequest::new(parts)
///     .with_route("/documents/{id}", [("id".to_string(), "42".to_string())]);
/// assert_eq!(auth.path_param("id"), Some("42"));
/// assert_eq!(auth.query_param("expand"), Some("meta".to_string()));
/// ```
#[derive(Debug)]
pub struct AuthRequest {
    parts: Parts,
    route_pattern: Option<String>,
    path_params: BTreeMap<String, String>,
}

impl AuthRequest {
    /// Creates an auth request from HTTP request parts, with no route match.
    #[must_use]
    pub fn new(parts: Parts) -> Self {
        Self {
            parts,
            route_pattern: None,
            path_params: BTreeMap::new(),
        }
    }

    /// Attaches the matched route pattern and its extracted path parameters.
    #[must_use]
    pub fn with_route(
        mut self,
        pattern: impl Into<String>,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.route_pattern = Some(pattern.into());
        self.path_params = params.into_iter().collect();
        self
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Returns the request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Returns the request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the matched route pattern (e.g. `/documents/{id}`), if the
    /// router produced one.
    #[must_use]
    pub fn route_pattern(&self) -> Option<&str> {
        self.route_pattern.as_deref()
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    /// Returns a single path parameter, if present.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Returns the first query parameter with the given name, if present.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.parts.uri.query()?;
        for pair in query.split('&') {
            let mut it = pair.splitn(2, '=');
            if it.next() == Some(name) {
                return Some(it.next().unwrap_or("").to_string());
            }
        }
        None
    }
}
