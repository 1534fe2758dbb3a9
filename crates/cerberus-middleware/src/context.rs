//! Per-request context flowing through the middleware chain.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use cerberus_core::{Identity, RequestId};

/// Mutable state carried alongside a request through the middleware chain.
///
/// The authorization middleware enriches the context with the caller
/// identity and the matched route; downstream stages and handlers read
/// them back, and can stash arbitrary typed values in the extensions.
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    identity: Identity,
    route_pattern: Option<String>,
    path_params: BTreeMap<String, String>,
    started_at: Instant,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a context with a fresh request id and anonymous identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            identity: Identity::None,
            route_pattern: None,
            path_params: BTreeMap::new(),
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Creates a context with a specific request id (e.g. from an upstream
    /// `x-request-id` header).
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            ..Self::new()
        }
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the caller identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sets the caller identity.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    /// Returns the matched route pattern, if routing has run.
    #[must_use]
    pub fn route_pattern(&self) -> Option<&str> {
        self.route_pattern.as_deref()
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    /// Records the matched route and its path parameters.
    pub fn set_route(
        &mut self,
        pattern: impl Into<String>,
        params: impl IntoIterator<Item = (String, String)>,
    ) {
        self.route_pattern = Some(pattern.into());
        self.path_params = params.into_iter().collect();
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_anonymous() {
        let ctx = MiddlewareContext::new();
        assert!(ctx.identity().is_anonymous());
        assert!(ctx.route_pattern().is_none());
    }

    #[test]
    fn test_set_identity() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(Identity::subject("u123"));
        assert_eq!(ctx.identity().value(), Some("u123"));
    }

    #[test]
    fn test_set_route() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_route(
            "/documents/{id}",
            [("id".to_string(), "42".to_string())],
        );
        assert_eq!(ctx.route_pattern(), Some("/documents/{id}"));
        assert_eq!(ctx.path_params()["id"], "42");
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, Clone, PartialEq)]
        struct Marker(u32);

        let mut ctx = MiddlewareContext::new();
        assert!(ctx.get_extension::<Marker>().is_none());

        ctx.set_extension(Marker(42));
        assert_eq!(ctx.get_extension::<Marker>(), Some(&Marker(42)));

        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(42)));
        assert!(ctx.get_extension::<Marker>().is_none());
    }

    #[test]
    fn test_preserves_supplied_request_id() {
        let id = RequestId::new();
        let ctx = MiddlewareContext::with_request_id(id);
        assert_eq!(ctx.request_id(), id);
    }
}
