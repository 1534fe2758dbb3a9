//! Cerberus Middleware - the request-interception layer.
//!
//! Two complementary surfaces over the same engine:
//!
//! - [`AuthorizationMiddleware`] - one instance wraps the application and
//!   auto-protects every registered route, failing closed on errors.
//! - [`guards`] - explicit per-route checks (policy, relation, hierarchy,
//!   fetch-then-authorize, list filtering) for handlers that need control
//!   over context or error handling.
//!
//! ```text
//! Request → [AuthorizationMiddleware] → handler
//!               │ route match → policy path
//!               │ identity / context
//!               │ engine.check_decision
//!               └ 401 / 403 / pass-through
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authorization;
pub mod context;
pub mod guards;
pub mod identity;
pub mod middleware;
pub mod routes;
pub mod types;

pub use authorization::{
    AuthorizationMiddleware, AuthorizationMiddlewareBuilder, DeniedResponseFn,
    MissingIdentityPolicy,
};
pub use context::MiddlewareContext;
pub use guards::{
    AutoPolicyGuard, GuardOutcome, HierarchyGuard, ListFilter, PolicyGuard, RelationGuard,
    ResourceGuard,
};
pub use identity::HeaderIdentityProvider;
pub use middleware::{BoxFuture, FnMiddleware, Middleware, Next};
pub use routes::{RouteMatch, RouteTable};
pub use types::{Request, Response, ResponseExt};
