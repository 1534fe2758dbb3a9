//! Cerberus Core - shared types for the Cerberus authorization middleware.
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//!
//! - [`Identity`] - who is making the request
//! - [`ResourceContext`] - what the request is about
//! - [`AuthRequest`] - the request view authorization checks operate on
//! - [`RequestId`] - correlation id attached to audit events and logs
//! - Provider traits ([`IdentityProvider`], [`ResourceContextProvider`],
//!   [`ResourceFetcher`]) - the explicit collaborator interfaces supplied
//!   by the hosting application
//!
//! Providers are injected into the engine and middleware at construction
//! time; there is no process-wide configuration state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod identity;
pub mod providers;
pub mod request;
pub mod request_id;

// Re-exports for convenience
pub use context::ResourceContext;
pub use identity::{Identity, IdentityKind};
pub use providers::{
    BoxFuture, IdentityProvider, ResourceContextFn, ResourceContextProvider, ResourceFetcher,
};
pub use request::AuthRequest;
pub use request_id::RequestId;
