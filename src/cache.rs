//! TTL Cache
//!
//! Keyed read-through cache with an injected clock. An entry is served while it is
//! younger than the TTL; after that the next call refreshes it. Entries are replaced
//! wholesale, never mutated in place, and a failed refresh is returned to the caller
//! even when an expired entry is still held.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Default cache validity window
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A stored value and when it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: Arc<V>,
    pub created_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// Age at `now`; an entry from the future counts as brand new
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

/// Point-in-time view of one entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryStatus {
    pub created_at: DateTime<Utc>,
    pub age: Duration,
    pub ttl: Duration,
    pub valid: bool,
    /// Time until expiry, zero once expired
    pub refresh_in: Duration,
}

/// Keyed TTL cache
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored value if it is still within `ttl`
    pub fn get_fresh(&self, key: &K, ttl: Duration) -> Option<Arc<V>> {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .filter(|entry| entry.is_fresh(now, ttl))
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Return the fresh entry for `key`, or run `refresh` and store its result.
    ///
    /// `refresh` is not called while a fresh entry exists. Its error is returned
    /// unchanged and leaves any expired entry in place but unserved.
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        key: K,
        ttl: Duration,
        refresh: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get_fresh(&key, ttl) {
            debug!(?key, "Cache hit");
            return Ok(value);
        }

        debug!(?key, "Cache miss, refreshing");
        let value = Arc::new(refresh().await?);
        let entry = CacheEntry {
            value: Arc::clone(&value),
            created_at: self.clock.now(),
        };
        self.lock().insert(key, entry);
        Ok(value)
    }

    /// Status of the entry for `key`, `None` if nothing was ever stored
    pub fn status(&self, key: &K, ttl: Duration) -> Option<EntryStatus> {
        let now = self.clock.now();
        let entries = self.lock();
        let entry = entries.get(key)?;
        let age = entry.age(now);
        let valid = age < ttl;

        Some(EntryStatus {
            created_at: entry.created_at,
            age,
            ttl,
            valid,
            refresh_in: if valid { ttl - age } else { Duration::ZERO },
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
