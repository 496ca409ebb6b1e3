//! Bounded in-memory cache with TTL and LRU eviction
//!
//! Replaces ad-hoc dict-with-timestamps caching with one abstraction shared by
//! the tenant config cache, the cron job cache, and the HTTP response cache.
//! The clock is injectable so expiry can be tested deterministically.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for cache expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time, used everywhere outside of tests
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
}

/// Cache with a fixed TTL and a maximum entry count.
///
/// An entry older than the TTL is treated as absent. When an insert would
/// exceed the maximum length, the least recently accessed entry is evicted.
pub struct ExpiringCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    max_len: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpiringCache<K, V> {
    pub fn new(max_len: usize, ttl: Duration) -> Self {
        Self::with_clock(max_len, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(max_len: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        ExpiringCache {
            entries: Mutex::new(HashMap::new()),
            max_len,
            ttl,
            clock,
        }
    }

    /// Get a fresh value, updating its access time. Expired entries are
    /// dropped and reported as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        // Drop everything already expired before considering eviction
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.inserted_at) < ttl);

        if entries.len() >= self.max_len && !entries.contains_key(&key) {
            // Evict the least recently accessed entry
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_access: now,
            },
        );
    }

    pub fn remove(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Manually advanced clock for deterministic expiry tests
#[cfg(test)]
pub(crate) struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache: ExpiringCache<String, i32> =
            ExpiringCache::with_clock(10, Duration::from_secs(60), clock.clone());

        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let clock = Arc::new(ManualClock::new());
        let cache: ExpiringCache<String, i32> =
            ExpiringCache::with_clock(2, Duration::from_secs(600), clock.clone());

        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(1));
        cache.insert("b".to_string(), 2);
        clock.advance(Duration::from_secs(1));

        // Touch "a" so "b" becomes the least recently used
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        clock.advance(Duration::from_secs(1));

        cache.insert("c".to_string(), 3);
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }

    #[test]
    fn test_reinsert_does_not_evict_others() {
        let cache: ExpiringCache<String, i32> =
            ExpiringCache::new(2, Duration::from_secs(600));

        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);

        assert_eq!(cache.get(&"a".to_string()), Some(10));
        assert_eq!(cache.get(&"b".to_string()), Some(2));
    }
}
