//! # Cerberus
//!
//! **Authorization middleware for async Rust HTTP services**
//!
//! Cerberus sits between your application and a remote policy authorizer.
//! It intercepts every inbound request (globally, or via explicit per-route
//! guards), derives a policy path from the route and method, gathers
//! identity and resource context, and asks the authorizer "is this
//! allowed?" - while shielding the application from authorizer latency and
//! outages with caching, connection pooling, and a circuit breaker with
//! configurable fallback.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cerberus::prelude::*;
//!
//! let engine = Arc::new(
//!     AuthzEngine::builder("webapp", "webapp", Arc::new(HeaderIdentityProvider::new()))
//!         .with_options(AuthorizerOptions::new("https://localhost:8383"))
//!         .with_cache(DecisionCache::new(CacheConfig::default()))
//!         .with_circuit_breaker(CircuitBreaker::new(BreakerConfig::default()))
//!         .build()?,
//! );
//!
//! let routes = Arc::new(
//!     RouteTable::new()
//!         .route("GET", "/documents")
//!         .route("GET", "/documents/{id}")
//!         .route_excluded("GET", "/health"),
//! );
//!
//! let middleware = AuthorizationMiddleware::new(engine, routes);
//! // wrap your application's handler chain with `middleware`
//! ```
//!
//! ## Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `cerberus-core` | `Identity`, `ResourceContext`, `AuthRequest`, provider traits |
//! | `cerberus-authz` | decision cache, connection pool, circuit breaker, engine |
//! | `cerberus-middleware` | global middleware, guards, route table |
//! | `cerberus-telemetry` | audit logging, metrics, tracing spans |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Core types and collaborator traits.
pub use cerberus_core as core;

/// The decision pipeline: cache, pool, circuit breaker, engine.
pub use cerberus_authz as authz;

/// Guards and the global authorization middleware.
pub use cerberus_middleware as middleware;

/// Audit logging, metrics, and tracing spans.
pub use cerberus_telemetry as telemetry;

/// The commonly needed surface in one import.
pub mod prelude {
    pub use cerberus_authz::{
        AuthorizerOptions, AuthzEngine, BreakerConfig, CacheConfig, CircuitBreaker,
        ConnectionPool, DecisionCache, FallbackStrategy, HierarchyCheck, HierarchyMode,
        IdSource, PoolConfig, TransportSecurity,
    };
    pub use cerberus_core::{AuthRequest, Identity, IdentityProvider, ResourceContext};
    pub use cerberus_middleware::{
        AuthorizationMiddleware, AutoPolicyGuard, GuardOutcome, HeaderIdentityProvider,
        HierarchyGuard, ListFilter, MissingIdentityPolicy, PolicyGuard, RelationGuard,
        ResourceGuard, RouteTable,
    };
    pub use cerberus_telemetry::{AuditLogger, LogConfig};
}
