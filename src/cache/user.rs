//! Bounded, TTL-based cache of user records keyed by email.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::UserCacheConfig;
use crate::clock::Clock;

/// Result of consulting the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A fresh record
    Hit(Value),
    /// The user was recently looked up and does not exist
    KnownMissing,
    Miss,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub negative: usize,
    pub ttl_seconds: u64,
    pub negative_ttl_seconds: Option<u64>,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
enum Cached {
    Found(Value),
    Missing,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Cached,
    cached_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thread-safe user record cache.
///
/// One lock guards the map and the counters. Expired entries are dropped
/// when they are looked up; when a new key would exceed `max_size`, the
/// oldest quarter of the entries (at least one) is evicted first.
pub struct UserCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    negative_ttl: Option<Duration>,
    max_size: usize,
    inner: Mutex<Inner>,
}

/// Cache key for an email: trimmed and lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::days(36_500))
}

impl UserCache {
    pub fn new(clock: Arc<dyn Clock>, config: &UserCacheConfig) -> Self {
        Self {
            clock,
            ttl: to_chrono(config.ttl),
            negative_ttl: config.negative_ttl.map(to_chrono),
            max_size: config.max_size.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        let ttl = match entry.value {
            Cached::Found(_) => self.ttl,
            Cached::Missing => match self.negative_ttl {
                Some(ttl) => ttl,
                None => return true,
            },
        };
        now - entry.cached_at >= ttl
    }

    /// Look up `email`, evicting the entry if it has expired.
    pub fn lookup(&self, email: &str) -> CacheLookup {
        let key = normalize_email(email);
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let cached = inner.entries.get(&key).map(|entry| {
            if self.is_expired(entry, now) {
                None
            } else {
                Some(match &entry.value {
                    Cached::Found(record) => CacheLookup::Hit(record.clone()),
                    Cached::Missing => CacheLookup::KnownMissing,
                })
            }
        });

        match cached {
            Some(Some(found)) => {
                inner.hits += 1;
                trace!("User cache hit for {}", key);
                found
            }
            Some(None) => {
                inner.entries.remove(&key);
                inner.evictions += 1;
                inner.misses += 1;
                debug!("User cache entry for {} expired", key);
                CacheLookup::Miss
            }
            None => {
                inner.misses += 1;
                trace!("User cache miss for {}", key);
                CacheLookup::Miss
            }
        }
    }

    /// Fresh record for `email`, if cached.
    pub fn get(&self, email: &str) -> Option<Value> {
        match self.lookup(email) {
            CacheLookup::Hit(record) => Some(record),
            CacheLookup::KnownMissing | CacheLookup::Miss => None,
        }
    }

    /// Cache `record` under `email`.
    pub fn put(&self, email: &str, record: Value) {
        self.insert(normalize_email(email), Cached::Found(record));
    }

    /// Remember that `email` has no user. No-op unless negative caching is configured.
    pub fn put_missing(&self, email: &str) {
        if self.negative_ttl.is_none() {
            return;
        }
        self.insert(normalize_email(email), Cached::Missing);
    }

    fn insert(&self, key: String, value: Cached) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            let count = (inner.entries.len() / 4).max(1);
            let mut by_age: Vec<(DateTime<Utc>, String)> = inner
                .entries
                .iter()
                .map(|(k, e)| (e.cached_at, k.clone()))
                .collect();
            by_age.sort();

            for (_, oldest) in by_age.into_iter().take(count) {
                inner.entries.remove(&oldest);
            }
            inner.evictions += count as u64;
            debug!("User cache full, evicted {} oldest entries", count);
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                cached_at: now,
            },
        );
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        debug!("User cache cleared ({} entries)", count);
    }

    /// Statistics snapshot; does not evict anything.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let inner = self.inner.lock();

        let expired = inner
            .entries
            .values()
            .filter(|e| self.is_expired(e, now))
            .count();
        let negative = inner
            .entries
            .values()
            .filter(|e| matches!(e.value, Cached::Missing) && !self.is_expired(e, now))
            .count();

        CacheStats {
            total: inner.entries.len(),
            active: inner.entries.len() - expired,
            expired,
            negative,
            ttl_seconds: self.ttl.num_seconds().max(0) as u64,
            negative_ttl_seconds: self.negative_ttl.map(|t| t.num_seconds().max(0) as u64),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache_with(config: UserCacheConfig) -> (Arc<ManualClock>, UserCache) {
        let clock = Arc::new(ManualClock::default());
        let cache = UserCache::new(clock.clone(), &config);
        (clock, cache)
    }

    fn default_cache() -> (Arc<ManualClock>, UserCache) {
        cache_with(UserCacheConfig::default())
    }

    #[test]
    fn test_ttl_boundary() {
        let (clock, cache) = default_cache();
        cache.put("a@example.com", json!({"Id": 1}));

        clock.advance(Duration::minutes(29) + Duration::seconds(59));
        assert_eq!(cache.get("a@example.com"), Some(json!({"Id": 1})));

        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get("a@example.com"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let (_clock, cache) = default_cache();
        cache.put("  Jane.Doe@Example.COM ", json!({"Id": 7}));

        assert_eq!(cache.get("jane.doe@example.com"), Some(json!({"Id": 7})));
        assert_eq!(cache.get("JANE.DOE@EXAMPLE.COM"), Some(json!({"Id": 7})));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_entry() {
        let (clock, cache) = cache_with(UserCacheConfig {
            max_size: 4,
            ..Default::default()
        });

        for i in 0..4 {
            cache.put(&format!("user{}@example.com", i), json!({"Id": i}));
            clock.advance(Duration::seconds(1));
        }
        cache.put("user4@example.com", json!({"Id": 4}));

        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get("user0@example.com"), None);
        for i in 1..5 {
            assert_eq!(
                cache.get(&format!("user{}@example.com", i)),
                Some(json!({"Id": i}))
            );
        }
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_bulk_eviction_removes_a_quarter() {
        let (clock, cache) = cache_with(UserCacheConfig {
            max_size: 8,
            ..Default::default()
        });

        for i in 0..8 {
            cache.put(&format!("user{}@example.com", i), json!({"Id": i}));
            clock.advance(Duration::seconds(1));
        }
        cache.put("new@example.com", json!({"Id": 99}));

        assert_eq!(cache.len(), 7);
        assert_eq!(cache.get("user0@example.com"), None);
        assert_eq!(cache.get("user1@example.com"), None);
        assert!(cache.get("user2@example.com").is_some());
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let (clock, cache) = cache_with(UserCacheConfig {
            max_size: 5,
            ..Default::default()
        });

        for i in 0..50 {
            cache.put(&format!("user{}@example.com", i), json!({"Id": i}));
            clock.advance(Duration::milliseconds(10));
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let (_clock, cache) = cache_with(UserCacheConfig {
            max_size: 2,
            ..Default::default()
        });
        cache.put("a@example.com", json!({"Id": 1}));
        cache.put("b@example.com", json!({"Id": 2}));
        cache.put("A@example.com", json!({"Id": 3}));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a@example.com"), Some(json!({"Id": 3})));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_stats_has_no_side_effects() {
        let (clock, cache) = default_cache();
        cache.put("a@example.com", json!({"Id": 1}));
        cache.put("b@example.com", json!({"Id": 2}));
        clock.advance(Duration::minutes(31));
        cache.put("c@example.com", json!({"Id": 3}));

        let stats = cache.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.ttl_seconds, 1800);
        assert_eq!(stats.max_size, 100);
        assert_eq!(stats, cache.stats());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let (_clock, cache) = default_cache();
        assert_eq!(cache.lookup("a@example.com"), CacheLookup::Miss);
        cache.put("a@example.com", json!({"Id": 1}));
        cache.get("a@example.com");
        cache.get("a@example.com");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_negative_caching_disabled_by_default() {
        let (_clock, cache) = default_cache();
        cache.put_missing("ghost@example.com");

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.lookup("ghost@example.com"), CacheLookup::Miss);
    }

    #[test]
    fn test_negative_caching_expires() {
        let (clock, cache) = cache_with(UserCacheConfig {
            negative_ttl: Some(std::time::Duration::from_secs(60)),
            ..Default::default()
        });
        cache.put_missing("Ghost@example.com");

        assert_eq!(cache.lookup("ghost@example.com"), CacheLookup::KnownMissing);
        assert_eq!(cache.get("ghost@example.com"), None);
        assert_eq!(cache.stats().negative, 1);

        clock.advance(Duration::seconds(60));
        assert_eq!(cache.lookup("ghost@example.com"), CacheLookup::Miss);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear() {
        let (_clock, cache) = default_cache();
        cache.put("a@example.com", json!({"Id": 1}));
        cache.put("b@example.com", json!({"Id": 2}));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get("a@example.com"), None);
    }

    #[test]
    fn test_concurrent_puts_respect_capacity() {
        let (_clock, cache) = cache_with(UserCacheConfig {
            max_size: 10,
            ..Default::default()
        });
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.put(&format!("user{}-{}@example.com", t, i), json!({"Id": i}));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 10);
    }
}
