//! Connection pooling for authorizer clients.
//!
//! Reuses client connections across requests to avoid per-call connection
//! overhead. A counting semaphore enforces `max_connections`; bookkeeping
//! (idle queue, busy set, live health flags) sits behind one short-lived
//! mutex that is never held across an await point.
//!
//! Connection lifecycle:
//!
//! ```text
//!   idle ──acquire──► busy ──release(healthy)──► idle
//!                      │
//!                      └──release(unhealthy)──► discarded
//!   idle ──sweep, idle too long, pool above min──► discarded
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};

use crate::error::{AuthzError, AuthzResult};
use crate::transport::{DecisionClient, TransportFactory};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum connections to keep warm.
    pub min_connections: usize,
    /// Maximum connections allowed.
    pub max_connections: usize,
    /// How long `acquire` waits for a connection before failing.
    pub acquire_timeout: Duration,
    /// Advisory bound for establishing a new connection; enforcement is the
    /// transport's responsibility.
    pub connect_timeout: Duration,
    /// Idle age beyond which a connection is eligible for eviction.
    pub max_idle_time: Duration,
    /// Interval between idle-sweep passes; zero disables the sweep.
    pub idle_check_interval: Duration,
    /// Advisory interval between connection health checks.
    pub health_check_interval: Duration,
    /// Advisory bound for a single health check.
    pub health_check_timeout: Duration,
    /// Create `min_connections` eagerly at initialization.
    pub eager_init: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_idle_time: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            eager_init: false,
        }
    }
}

/// Snapshot of pool state for health endpoints.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Total live connections.
    pub total: usize,
    /// Connections in the idle queue.
    pub idle: usize,
    /// Connections currently checked out.
    pub busy: usize,
    /// Live connections still marked healthy.
    pub healthy_connections: usize,
    /// Configured maximum.
    pub max_connections: usize,
    /// Configured minimum.
    pub min_connections: usize,
}

impl PoolStatus {
    /// A pool is healthy with at least one healthy connection; an empty pool
    /// is also healthy - it simply has not been used yet.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.healthy_connections > 0 || self.total == 0
    }
}

/// A pooled authorizer connection with metadata.
pub struct PooledConnection {
    id: u64,
    client: Arc<dyn DecisionClient>,
    created_at: Instant,
    last_used_at: Instant,
    healthy: Arc<AtomicBool>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("healthy", &self.is_healthy())
            .field("idle_time", &self.idle_time())
            .finish()
    }
}

impl PooledConnection {
    fn new(id: u64, client: Arc<dyn DecisionClient>) -> Self {
        let now = Instant::now();
        Self {
            id,
            client,
            created_at: now,
            last_used_at: now,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns the client handle.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn DecisionClient> {
        &self.client
    }

    /// When this connection was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Seconds since last use.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Updates the last-used timestamp.
    fn mark_used(&mut self) {
        self.last_used_at = Instant::now();
    }

    /// Marks the connection unhealthy; it will be discarded on release.
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    /// Whether the connection is still considered healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct PoolInner {
    idle: VecDeque<PooledConnection>,
    busy: HashSet<u64>,
    live: HashMap<u64, Arc<AtomicBool>>,
    factory: Option<Arc<dyn TransportFactory>>,
    initialized: bool,
    closed: bool,
    sweep_task: Option<tokio::task::JoinHandle<()>>,
}

/// Async connection pool for authorizer clients.
pub struct ConnectionPool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    inner: Arc<Mutex<PoolInner>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("status", &status)
            .finish()
    }
}

impl ConnectionPool {
    /// Creates an unconfigured pool.
    ///
    /// [`configure`](Self::configure) must be called with a transport
    /// factory before first use.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let max = config.max_connections;
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(max)),
            inner: Arc::new(Mutex::new(PoolInner::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a pool with default sizing.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Supplies the transport factory connections are created with.
    pub fn configure(&self, factory: Arc<dyn TransportFactory>) {
        self.inner.lock().factory = Some(factory);
    }

    fn create_connection(&self, inner: &mut PoolInner) -> AuthzResult<PooledConnection> {
        let factory = inner
            .factory
            .as_ref()
            .ok_or_else(|| AuthzError::config("connection pool has no transport factory"))?
            .clone();
        let client = factory.connect()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = PooledConnection::new(id, client);
        inner.live.insert(id, Arc::clone(&conn.healthy));
        tracing::debug!(pool_size = inner.live.len(), "created new connection");
        Ok(conn)
    }

    /// Initializes the pool.
    ///
    /// Idempotent. With `eager_init`, creates `min_connections` up front,
    /// swallowing per-connection failures with a warning so that a down
    /// authorizer at startup does not crash the host application. Starts
    /// the background idle sweep when `idle_check_interval` is positive.
    pub async fn initialize(&self) {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return;
        }

        if self.config.eager_init {
            for _ in 0..self.config.min_connections {
                match self.create_connection(&mut inner) {
                    Ok(conn) => inner.idle.push_back(conn),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to create initial connection");
                    }
                }
            }
        }

        if self.config.idle_check_interval > Duration::ZERO {
            let inner_handle = Arc::clone(&self.inner);
            let config = self.config.clone();
            inner.sweep_task = Some(tokio::spawn(async move {
                let mut ticker = interval(config.idle_check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if inner_handle.lock().closed {
                        break;
                    }
                    Self::sweep_idle(&inner_handle, &config);
                }
            }));
        }

        inner.initialized = true;
        tracing::info!(
            min = self.config.min_connections,
            max = self.config.max_connections,
            "connection pool initialized"
        );
    }

    /// Evicts idle connections older than `max_idle_time`, keeping the pool
    /// at or above `min_connections`.
    fn sweep_idle(inner: &Mutex<PoolInner>, config: &PoolConfig) {
        let mut inner = inner.lock();
        let mut kept: VecDeque<PooledConnection> = VecDeque::new();
        let mut closed = 0usize;

        while let Some(conn) = inner.idle.pop_front() {
            // Removals are already reflected in live.len()
            let above_min = inner.live.len() > config.min_connections;
            if conn.idle_time() > config.max_idle_time && above_min {
                inner.live.remove(&conn.id);
                closed += 1;
            } else {
                kept.push_back(conn);
            }
        }
        inner.idle = kept;

        if closed > 0 {
            tracing::debug!(
                closed,
                pool_size = inner.live.len(),
                "closed idle connections"
            );
        }
    }

    /// Acquires a connection.
    ///
    /// Pops an idle connection when one is available, otherwise creates a
    /// new one. Waits up to `acquire_timeout` for a slot when the pool is at
    /// `max_connections`.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::PoolClosed`] after [`close`](Self::close)
    /// - [`AuthzError::PoolExhausted`] when the acquire timeout elapses
    /// - connection-creation errors from the transport factory
    pub async fn acquire(&self) -> AuthzResult<PooledConnection> {
        if self.inner.lock().closed {
            return Err(AuthzError::PoolClosed);
        }

        if !self.inner.lock().initialized {
            self.initialize().await;
        }

        let permit = timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                tracing::warn!("timeout waiting to acquire connection from pool");
                AuthzError::PoolExhausted {
                    waited_ms: self.config.acquire_timeout.as_millis() as u64,
                }
            })?
            .map_err(|_| AuthzError::PoolClosed)?;
        permit.forget();

        let mut inner = self.inner.lock();

        if let Some(mut conn) = inner.idle.pop_front() {
            conn.mark_used();
            inner.busy.insert(conn.id);
            tracing::debug!(busy = inner.busy.len(), "acquired idle connection");
            return Ok(conn);
        }

        match self.create_connection(&mut inner) {
            Ok(mut conn) => {
                conn.mark_used();
                inner.busy.insert(conn.id);
                tracing::debug!(busy = inner.busy.len(), "created connection for acquire");
                Ok(conn)
            }
            Err(e) => {
                // Give the slot back so the failed creation can be retried
                self.semaphore.add_permits(1);
                Err(e)
            }
        }
    }

    /// Returns a connection to the pool.
    ///
    /// Healthy connections rejoin the idle queue; unhealthy ones are
    /// discarded. Either way the `max_connections` slot is released, which
    /// is what lets discarded connections be replaced.
    pub fn release(&self, mut conn: PooledConnection) {
        let mut inner = self.inner.lock();

        if !inner.busy.remove(&conn.id) {
            tracing::warn!("attempted to release connection not marked as busy");
            return;
        }

        if conn.is_healthy() && !inner.closed {
            conn.mark_used();
            inner.idle.push_back(conn);
            tracing::debug!("released connection back to idle pool");
        } else {
            inner.live.remove(&conn.id);
            tracing::debug!("discarded unhealthy connection");
        }
        drop(inner);

        self.semaphore.add_permits(1);
    }

    /// Returns a snapshot of pool state for health checks.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock();
        PoolStatus {
            total: inner.live.len(),
            idle: inner.idle.len(),
            busy: inner.busy.len(),
            healthy_connections: inner
                .live
                .values()
                .filter(|h| h.load(Ordering::SeqCst))
                .count(),
            max_connections: self.config.max_connections,
            min_connections: self.config.min_connections,
        }
    }

    /// Closes the pool.
    ///
    /// Cancels the idle sweep, drains the idle queue, and clears all
    /// bookkeeping. Subsequent [`acquire`](Self::acquire) calls fail
    /// immediately.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;

        if let Some(task) = inner.sweep_task.take() {
            task.abort();
        }

        inner.idle.clear();
        inner.busy.clear();
        inner.live.clear();

        tracing::info!("connection pool closed");
    }
}
