//! Cerberus Authz - the authorization decision pipeline.
//!
//! This crate implements the core of Cerberus: a low-latency, fail-safe
//! pipeline between an HTTP application and a remote policy authorizer.
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────────────────────────────────────┐
//!   request   │               AuthzEngine                    │
//!  ──────────►│  check_decision / check_relation / hierarchy │
//!             └──────┬───────────────┬──────────────┬────────┘
//!                    │ 1. lookup     │ 2. gate      │ 3. call
//!             ┌──────▼──────┐ ┌──────▼───────┐ ┌────▼───────────┐
//!             │ DecisionCache│ │CircuitBreaker│ │ ConnectionPool │
//!             │  (+ stale)   │ │ closed/open/ │ │  (semaphore-   │
//!             │              │ │  half-open   │ │   bounded)     │
//!             └──────────────┘ └──────────────┘ └────┬───────────┘
//!                                                    │ decide()
//!                                              ┌─────▼──────────┐
//!                                              │ remote         │
//!                                              │ authorizer     │
//!                                              └────────────────┘
//! ```
//!
//! When the authorizer is healthy, decisions come back in one pooled round
//! trip and are cached. When it is not, the circuit breaker opens and
//! serves a configurable fallback - optionally a stale cached decision -
//! so the application keeps answering requests.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cerberus_authz::{AuthorizerOptions, AuthzEngine, CacheConfig, DecisionCache};
//! use cerberus_core::{AuthRequest, Identity};
//!
//! let engine = AuthzEngine::builder(
//!     "webapp",
//!     "webapp",
//!     Arc::new(|req: &AuthRequest| {
//!         req.header("x-user-id").map_or(Identity::anonymous(), Identity::subject)
//!     }),
//! )
//! .with_options(AuthorizerOptions::new("https://localhost:8383"))
//! .with_cache(DecisionCache::new(CacheConfig::default()))
//! .build()?;
//!
//! let allowed = engine.is_allowed(&request, "webapp.GET.documents", None).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod cache;
pub mod engine;
pub mod error;
pub mod policy;
pub mod pool;
pub mod testing;
pub mod transport;

// Re-exports for convenience
pub use breaker::{
    BreakerConfig, CircuitBreaker, CircuitState, CircuitStatus, FallbackContext, FallbackDecider,
    FallbackStrategy,
};
pub use cache::{CacheConfig, DecisionCache, StaleCache};
pub use engine::{
    AuthzEngine, AuthzEngineBuilder, HierarchyCheck, HierarchyMode, HierarchyResult,
    DEFAULT_DECISION,
};
pub use error::{AuthzError, AuthzResult};
pub use policy::{path_heuristic, resolve_policy_path, IdSource};
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
pub use transport::{
    AuthorizerOptions, DecisionClient, DecisionRequest, HttpTransportFactory, TransportFactory,
    TransportSecurity,
};
