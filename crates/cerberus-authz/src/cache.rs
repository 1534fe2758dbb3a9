//! Decision caching.
//!
//! Two tables with different jobs:
//!
//! - [`DecisionCache`] - the fresh cache. Fixed TTL, size bounded, consulted
//!   before every authorizer call to avoid redundant round trips.
//! - [`StaleCache`] - a side table of previously successful decisions kept
//!   past the normal TTL. Read only by the circuit breaker's fallback path
//!   when the fresh cache has nothing; written only after a real, successful
//!   authorizer call.
//!
//! Keys are a truncated SHA-256 digest over identity, policy path, decision
//! name, and the canonical (sorted-key) context serialization. Truncating to
//! 32 hex characters trades a vanishing collision probability for smaller
//! keys; callers needing strict guarantees can widen `KEY_PREFIX_LEN`.

use cerberus_core::ResourceContext;
use indexmap::IndexMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::{Duration, Instant};

/// Hex characters kept from the full SHA-256 digest.
const KEY_PREFIX_LEN: usize = 32;

/// Maximum entries retained in the stale side table.
const MAX_STALE_ENTRIES: usize = 10_000;

/// Computes the cache key for a decision.
#[must_use]
pub fn decision_key(
    identity_value: &str,
    policy_path: &str,
    decision: &str,
    context: &ResourceContext,
) -> String {
    let ctx_str = if context.is_empty() {
        String::new()
    } else {
        context.canonical()
    };
    let key_data = format!("{identity_value}:{policy_path}:{decision}:{ctx_str}");
    let digest = Sha256::digest(key_data.as_bytes());
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..KEY_PREFIX_LEN].to_string()
}

/// Configuration for the fresh decision cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cache entries.
    pub ttl: Duration,
    /// Maximum number of entries to cache.
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_size: 1_000,
        }
    }
}

/// A cached authorization decision with expiration.
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: bool,
    expires_at: Instant,
}

/// In-memory TTL cache for authorization decisions.
///
/// A single coarse lock serializes access; cache operations are O(1) map
/// lookups next to the network round trip they replace.
#[derive(Debug)]
pub struct DecisionCache {
    config: CacheConfig,
    entries: Mutex<IndexMap<String, CacheEntry>>,
}

impl DecisionCache {
    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Creates a cache with the default 60s TTL and 1000-entry bound.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Returns a cached decision, or `None` if absent or expired.
    ///
    /// An expired entry discovered here is evicted.
    pub fn get(
        &self,
        identity_value: &str,
        policy_path: &str,
        decision: &str,
        context: &ResourceContext,
    ) -> Option<bool> {
        let key = decision_key(identity_value, policy_path, decision, context);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if Instant::now() <= entry.expires_at => Some(entry.value),
            Some(_) => {
                entries.shift_remove(&key);
                None
            }
            None => None,
        }
    }

    /// Caches a decision.
    ///
    /// At capacity, expired entries are evicted first; if the table is still
    /// full, the oldest ~10% (insertion order) are dropped.
    pub fn set(
        &self,
        identity_value: &str,
        policy_path: &str,
        decision: &str,
        context: &ResourceContext,
        value: bool,
    ) {
        let key = decision_key(identity_value, policy_path, decision, context);
        let mut entries = self.entries.lock();

        if entries.len() >= self.config.max_size {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at >= now);

            if entries.len() >= self.config.max_size {
                let drop_count = (self.config.max_size / 10).max(1).min(entries.len());
                entries.drain(..drop_count);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.config.ttl,
            },
        );
    }

    /// Drops all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns the number of live entries (including not-yet-evicted expired
    /// ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Side table of previously successful decisions for circuit-open fallback.
///
/// Entries carry the time they were cached; staleness is judged against the
/// breaker's `stale_cache_ttl` at read time.
#[derive(Debug, Default)]
pub struct StaleCache {
    entries: Mutex<IndexMap<String, (bool, Instant)>>,
}

impl StaleCache {
    /// Creates an empty stale cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stale decision no older than `stale_ttl`, evicting entries
    /// that have aged out.
    pub fn get(
        &self,
        identity_value: &str,
        policy_path: &str,
        decision: &str,
        context: &ResourceContext,
        stale_ttl: Duration,
    ) -> Option<bool> {
        let key = decision_key(identity_value, policy_path, decision, context);
        let mut entries = self.entries.lock();
        let (value, cached_at) = *entries.get(&key)?;
        if cached_at.elapsed() > stale_ttl {
            entries.shift_remove(&key);
            return None;
        }
        Some(value)
    }

    /// Stores a decision. Only successful authorizer responses belong here.
    pub fn set(
        &self,
        identity_value: &str,
        policy_path: &str,
        decision: &str,
        context: &ResourceContext,
        value: bool,
    ) {
        let key = decision_key(identity_value, policy_path, decision, context);
        let mut entries = self.entries.lock();
        entries.insert(key, (value, Instant::now()));

        if entries.len() > MAX_STALE_ENTRIES {
            let drop_count = MAX_STALE_ENTRIES / 10;
            entries.sort_by(|_, (_, a), _, (_, b)| a.cmp(b));
            entries.drain(..drop_count);
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
