//! Short-lived cache of query results
//!
//! Navigation tends to repeat the same lookups in bursts (hover, then go to
//! definition, then find references on the same identifier), so results are
//! kept for a few minutes under their normalized query key.
//!
//! Cached lists are shared as `Arc<[LocatedSymbol]>`: every caller hitting
//! the same key gets the same immutable list. Expired entries are dropped
//! lazily when looked up; there is no background sweeper and no size bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::models::LocatedSymbol;

/// Default lifetime of a cache entry
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Shared, immutable result list
pub type CachedResults = Arc<[LocatedSymbol]>;

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CacheEntry {
    value: CachedResults,
    expires_at: Instant,
}

/// TTL cache keyed by normalized query
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResultCache {
    /// Create a cache using the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            ttl,
        }
    }

    /// Lifetime applied by callers that don't pick their own
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up an unexpired entry
    pub fn get(&self, key: &str) -> Option<CachedResults> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(Arc::clone(&entry.value)),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict unless another writer refreshed it meanwhile
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
            log::trace!("Evicted expired cache entry '{}'", key);
        }
        None
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry
    pub fn set(&self, key: impl Into<String>, value: CachedResults, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: self.clock.now() + ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
