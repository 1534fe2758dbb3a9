//! Route table for policy-path derivation.
//!
//! The global middleware needs the *pattern* a request matched - not the
//! literal path - to derive a stable policy path (`/documents/42` must
//! authorize as `/documents/{id}`). This table holds the application's
//! routes with their `{name}` placeholders and resolves incoming requests
//! to a [`RouteMatch`].

use std::collections::BTreeMap;

use http::Method;

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Must match exactly.
    Literal(String),
    /// Matches any single segment, capturing it under the given name.
    Param(String),
}

fn parse_segments(pattern: &str) -> Vec<Segment> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .map_or_else(
                    || Segment::Literal(segment.to_string()),
                    |name| Segment::Param(name.to_string()),
                )
        })
        .collect()
}

/// A registered route.
#[derive(Debug, Clone)]
struct Route {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    skip_authorization: bool,
}

/// The result of matching a request against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The route pattern that matched, e.g. `/documents/{id}`.
    pub pattern: String,
    /// Captured path parameters.
    pub params: BTreeMap<String, String>,
    /// Whether the route opted out of middleware authorization.
    pub skip_authorization: bool,
}

/// An ordered set of routes; the first full match wins.
///
/// # Example
///
/// ```
/// use cerberus_middleware::routes::RouteTable;
/// use http::Method;
///
/// let routes = RouteTable::new()
///     .route("GET", "/documents")
///     .route("GET", "/documents/{id}")
///     .route_excluded("GET", "/health");
///
/// let matched = routes.match_route(&Method::GET, "/documents/42").unwrap();
/// assert_eq!(matched.pattern, "/documents/{id}");
/// assert_eq!(matched.params["id"], "42");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, method: &str, pattern: &str, skip_authorization: bool) -> Self {
        let method = method
            .parse::<Method>()
            .unwrap_or(Method::GET);
        self.routes.push(Route {
            method,
            pattern: pattern.to_string(),
            segments: parse_segments(pattern),
            skip_authorization,
        });
        self
    }

    /// Registers a route protected by the authorization middleware.
    #[must_use]
    pub fn route(self, method: &str, pattern: &str) -> Self {
        self.add(method, pattern, false)
    }

    /// Registers a route the authorization middleware skips entirely -
    /// for endpoints carrying their own explicit guards, or public ones.
    #[must_use]
    pub fn route_excluded(self, method: &str, pattern: &str) -> Self {
        self.add(method, pattern, true)
    }

    /// Matches a request method and path against the table.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let path_segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        'routes: for route in &self.routes {
            if route.method != *method {
                continue;
            }
            if route.segments.len() != path_segments.len() {
                continue;
            }

            let mut params = BTreeMap::new();
            for (segment, actual) in route.segments.iter().zip(&path_segments) {
                match segment {
                    Segment::Literal(expected) if expected == actual => {}
                    Segment::Literal(_) => continue 'routes,
                    Segment::Param(name) => {
                        params.insert(name.clone(), (*actual).to_string());
                    }
                }
            }

            return Some(RouteMatch {
                pattern: route.pattern.clone(),
                params,
                skip_authorization: route.skip_authorization,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new()
            .route("GET", "/documents")
            .route("POST", "/documents")
            .route("GET", "/documents/{id}")
            .route("GET", "/users/{user_id}/docs/{doc_id}")
            .route_excluded("GET", "/health")
    }

    #[test]
    fn test_literal_match() {
        let matched = table().match_route(&Method::GET, "/documents").unwrap();
        assert_eq!(matched.pattern, "/documents");
        assert!(matched.params.is_empty());
        assert!(!matched.skip_authorization);
    }

    #[test]
    fn test_method_disambiguates() {
        let matched = table().match_route(&Method::POST, "/documents").unwrap();
        assert_eq!(matched.pattern, "/documents");
        assert!(table().match_route(&Method::DELETE, "/documents").is_none());
    }

    #[test]
    fn test_param_capture() {
        let matched = table().match_route(&Method::GET, "/documents/42").unwrap();
        assert_eq!(matched.pattern, "/documents/{id}");
        assert_eq!(matched.params["id"], "42");
    }

    #[test]
    fn test_multi_param_capture() {
        let matched = table()
            .match_route(&Method::GET, "/users/u1/docs/d2")
            .unwrap();
        assert_eq!(matched.params["user_id"], "u1");
        assert_eq!(matched.params["doc_id"], "d2");
    }

    #[test]
    fn test_no_match_for_unknown_path() {
        assert!(table().match_route(&Method::GET, "/folders").is_none());
        assert!(table()
            .match_route(&Method::GET, "/documents/42/extra")
            .is_none());
    }

    #[test]
    fn test_trailing_slash_is_tolerated() {
        let matched = table().match_route(&Method::GET, "/documents/").unwrap();
        assert_eq!(matched.pattern, "/documents");
    }

    #[test]
    fn test_excluded_route_is_flagged() {
        let matched = table().match_route(&Method::GET, "/health").unwrap();
        assert!(matched.skip_authorization);
    }

    #[test]
    fn test_first_full_match_wins() {
        let routes = RouteTable::new()
            .route("GET", "/documents/{id}")
            .route("GET", "/documents/latest");
        let matched = routes.match_route(&Method::GET, "/documents/latest").unwrap();
        assert_eq!(matched.pattern, "/documents/{id}");
    }
}
