//! Retrieval query cache.
//!
//! LRU with TTL over recall results. Any ingest for a user bumps that
//! user's generation, invalidating every cached query of theirs without
//! touching other users' entries.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::constants::{QUERY_CACHE_CAPACITY, QUERY_CACHE_TTL_SECS};

/// Cache key combining the query parameters that affect results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Owning user.
    pub user_id: String,
    /// Query text ("" for the empty-query path).
    pub query: String,
    /// Result limit.
    pub limit: usize,
    /// Whether suppressed memories were requested.
    pub include_suppressed: bool,
    /// Tag filters, sorted.
    pub tags: Vec<String>,
}

impl QueryKey {
    /// Build a key; tag order is normalized so equivalent filters collide.
    #[must_use]
    pub fn new(user_id: &str, query: &str, limit: usize, include_suppressed: bool, tags: &[String]) -> Self {
        let mut tags = tags.to_vec();
        tags.sort();
        Self {
            user_id: user_id.to_string(),
            query: query.to_string(),
            limit,
            include_suppressed,
            tags,
        }
    }
}

struct CachedEntry {
    ranked: Vec<(Uuid, f32)>,
    generation: u64,
    cached_at: Instant,
}

/// Cache metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCacheMetrics {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that missed or found a stale entry.
    pub misses: u64,
}

impl QueryCacheMetrics {
    /// Hit rate in [0, 1].
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    entries: LruCache<QueryKey, CachedEntry>,
    generations: HashMap<String, u64>,
    metrics: QueryCacheMetrics,
}

/// LRU + TTL query cache with per-user generation invalidation.
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
}

impl QueryCache {
    /// Create a cache with default capacity and TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(QUERY_CACHE_CAPACITY, Duration::from_secs(QUERY_CACHE_TTL_SECS))
    }

    /// Create a cache with explicit capacity and TTL.
    #[must_use]
    pub fn with_settings(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                generations: HashMap::new(),
                metrics: QueryCacheMetrics::default(),
            }),
            ttl,
        }
    }

    /// Look up cached ranked `(memory_id, score)` pairs for a key.
    pub fn get(&self, key: &QueryKey) -> Option<Vec<(Uuid, f32)>> {
        let mut inner = self.inner.lock();
        let generation = inner.generations.get(&key.user_id).copied().unwrap_or(0);
        let live = match inner.entries.get(key) {
            Some(entry) => entry.generation == generation && entry.cached_at.elapsed() < self.ttl,
            None => false,
        };
        if live {
            inner.metrics.hits += 1;
            inner.entries.get(key).map(|entry| entry.ranked.clone())
        } else {
            inner.metrics.misses += 1;
            inner.entries.pop(key);
            None
        }
    }

    /// Store ranked results for a key.
    pub fn put(&self, key: QueryKey, ranked: Vec<(Uuid, f32)>) {
        let mut inner = self.inner.lock();
        let generation = inner.generations.get(&key.user_id).copied().unwrap_or(0);
        inner.entries.put(
            key,
            CachedEntry {
                ranked,
                generation,
                cached_at: Instant::now(),
            },
        );
    }

    /// Invalidate every cached query for a user (called on ingest and on
    /// any explicit mutation of their memories).
    pub fn invalidate_user(&self, user_id: &str) {
        let mut inner = self.inner.lock();
        *inner.generations.entry(user_id.to_string()).or_insert(0) += 1;
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> QueryCacheMetrics {
        self.inner.lock().metrics
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str, query: &str) -> QueryKey {
        QueryKey::new(user, query, 10, false, &[])
    }

    #[test]
    fn hit_after_put() {
        let cache = QueryCache::new();
        let ranked = vec![(Uuid::new_v4(), 0.8_f32)];
        cache.put(key("u1", "budget"), ranked.clone());
        assert_eq!(cache.get(&key("u1", "budget")), Some(ranked));
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn ingest_invalidates_only_that_user() {
        let cache = QueryCache::new();
        cache.put(key("u1", "budget"), vec![(Uuid::new_v4(), 0.5)]);
        cache.put(key("u2", "budget"), vec![(Uuid::new_v4(), 0.5)]);

        cache.invalidate_user("u1");
        assert_eq!(cache.get(&key("u1", "budget")), None);
        assert!(cache.get(&key("u2", "budget")).is_some());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = QueryCache::with_settings(16, Duration::from_millis(1));
        cache.put(key("u1", "budget"), vec![(Uuid::new_v4(), 0.5)]);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&key("u1", "budget")), None);
    }

    #[test]
    fn tag_order_does_not_split_entries() {
        let a = QueryKey::new("u1", "q", 5, false, &["x".into(), "y".into()]);
        let b = QueryKey::new("u1", "q", 5, false, &["y".into(), "x".into()]);
        assert_eq!(a, b);
    }
}
