//! Policy path derivation and id-source resolution.
//!
//! A policy path is a dotted hierarchical identifier naming which policy
//! rule to evaluate for a route, e.g. `webapp.GET.documents.__id` for
//! `GET /documents/{id}` under root `webapp`.

use std::sync::Arc;

use cerberus_core::AuthRequest;

/// Converts a URL path pattern to a policy path suffix.
///
/// Parameter placeholders (`{name}`) become `__name`; literal segments pass
/// through unchanged. Any string is accepted - malformed patterns simply
/// produce literal segments.
///
/// # Examples
///
/// ```
/// use cerberus_authz::policy::path_heuristic;
///
/// assert_eq!(path_heuristic("/"), "");
/// assert_eq!(path_heuristic("/documents"), ".documents");
/// assert_eq!(path_heuristic("/documents/{id}"), ".documents.__id");
/// assert_eq!(
///     path_heuristic("/users/{user_id}/docs/{doc_id}"),
///     ".users.__user_id.docs.__doc_id"
/// );
/// ```
#[must_use]
pub fn path_heuristic(pattern: &str) -> String {
    if pattern.is_empty() || pattern == "/" {
        return String::new();
    }

    let mut parts: Vec<String> = Vec::new();
    for segment in pattern.trim_matches('/').split('/') {
        if segment.is_empty() {
            continue;
        }
        if let Some(name) = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            parts.push(format!("__{name}"));
        } else {
            parts.push(segment.to_string());
        }
    }

    if parts.is_empty() {
        return String::new();
    }

    format!(".{}", parts.join("."))
}

/// Builds a full policy path from root, HTTP method, and route pattern.
///
/// # Examples
///
/// ```
/// use cerberus_authz::policy::resolve_policy_path;
///
/// assert_eq!(
///     resolve_policy_path("myapp", "GET", "/documents/{id}"),
///     "myapp.GET.documents.__id"
/// );
/// assert_eq!(resolve_policy_path("myapp", "GET", "/"), "myapp.GET");
/// ```
#[must_use]
pub fn resolve_policy_path(root: &str, method: &str, pattern: &str) -> String {
    format!("{root}.{method}{}", path_heuristic(pattern))
}

/// Where to take an object id from when evaluating hierarchy checks.
#[derive(Clone)]
pub enum IdSource {
    /// A route path parameter by name.
    Param(String),
    /// A request header by name.
    Header(String),
    /// A query parameter by name.
    Query(String),
    /// A literal value.
    Static(String),
    /// A caller-supplied extractor.
    Extract(Arc<dyn Fn(&AuthRequest) -> String + Send + Sync>),
}

impl std::fmt::Debug for IdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Param(name) => f.debug_tuple("IdSource::Param").field(name).finish(),
            Self::Header(name) => f.debug_tuple("IdSource::Header").field(name).finish(),
            Self::Query(name) => f.debug_tuple("IdSource::Query").field(name).finish(),
            Self::Static(value) => f.debug_tuple("IdSource::Static").field(value).finish(),
            Self::Extract(_) => write!(f, "IdSource::Extract(<fn>)"),
        }
    }
}

impl IdSource {
    /// Parses the string forms `"name"`, `"header:NAME"`, `"query:name"`,
    /// and `"static:value"`. A bare name means a path parameter.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        if let Some(name) = source.strip_prefix("header:") {
            Self::Header(name.to_string())
        } else if let Some(name) = source.strip_prefix("query:") {
            Self::Query(name.to_string())
        } else if let Some(value) = source.strip_prefix("static:") {
            Self::Static(value.to_string())
        } else {
            Self::Param(source.to_string())
        }
    }

    /// Creates an extractor-backed id source.
    pub fn extract(f: impl Fn(&AuthRequest) -> String + Send + Sync + 'static) -> Self {
        Self::Extract(Arc::new(f))
    }

    /// Resolves the id source against a request.
    ///
    /// Missing parameters and headers resolve to an empty string, matching
    /// the behavior of a missing object id in a relation check.
    #[must_use]
    pub fn resolve(&self, request: &AuthRequest) -> String {
        match self {
            Self::Param(name) => request.path_param(name).unwrap_or("").to_string(),
            Self::Header(name) => request.header(name).unwrap_or("").to_string(),
            Self::Query(name) => request.query_param(name).unwrap_or_default(),
            Self::Static(value) => value.clone(),
            Self::Extract(f) => f(request),
        }
    }
}

impl From<&str> for IdSource {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}
