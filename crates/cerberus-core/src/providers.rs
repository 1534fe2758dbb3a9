//! Collaborator interfaces supplied by the hosting application.
//!
//! The engine never reaches into the application's session store, database,
//! or auxiliary services directly. It is handed these interfaces at
//! construction time and treats their output as opaque.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{AuthRequest, Identity, ResourceContext};

/// A boxed future, as returned by async provider methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Extracts the caller identity from a request.
///
/// Implementations must be pure, fast, and synchronous - typically a read
/// of a session or token already attached to the request. A provider must
/// never perform I/O.
pub trait IdentityProvider: Send + Sync {
    /// Returns the identity for the given request.
    fn identity(&self, request: &AuthRequest) -> Identity;
}

impl<F> IdentityProvider for F
where
    F: Fn(&AuthRequest) -> Identity + Send + Sync,
{
    fn identity(&self, request: &AuthRequest) -> Identity {
        self(request)
    }
}

/// Supplies additional resource context for a request.
///
/// May be I/O-bound (e.g. consulting an auxiliary geolocation service).
/// Implementations are responsible for swallowing their own failures and
/// returning an empty context instead; the engine treats the output as
/// opaque extra context, never as a source of errors.
pub trait ResourceContextProvider: Send + Sync {
    /// Returns extra context to merge into the per-request resource context.
    fn context<'a>(&'a self, request: &'a AuthRequest) -> BoxFuture<'a, ResourceContext>;
}

/// A `ResourceContextProvider` built from a synchronous closure.
///
/// Convenient for the common case where the extra context is derived from
/// the request alone.
pub struct ResourceContextFn<F>(pub F);

impl<F> ResourceContextProvider for ResourceContextFn<F>
where
    F: Fn(&AuthRequest) -> ResourceContext + Send + Sync,
{
    fn context<'a>(&'a self, request: &'a AuthRequest) -> BoxFuture<'a, ResourceContext> {
        let ctx = (self.0)(request);
        Box::pin(async move { ctx })
    }
}

/// Fetches a resource for the resource-fetch guard.
///
/// Returns `None` when the resource does not exist, which the guard layer
/// translates to a 404 before any authorization check runs.
pub trait ResourceFetcher<T>: Send + Sync {
    /// Fetches the resource identified by the request.
    fn fetch<'a>(&'a self, request: &'a AuthRequest) -> BoxFuture<'a, Option<T>>;
}

impl<T, F, Fut> ResourceFetcher<T> for F
where
    F: Fn(&AuthRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Option<T>> + Send + 'static,
    T: 'static,
{
    fn fetch<'a>(&'a self, request: &'a AuthRequest) -> BoxFuture<'a, Option<T>> {
        Box::pin(self(request))
    }
}

/// A shared identity provider handle.
pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

/// A shared resource-context provider handle.
pub type SharedResourceContextProvider = Arc<dyn ResourceContextProvider>;
