//! # Tier Manager
//!
//! Hot / warm / cold placement. Reads attempt hot first, then the
//! document store; access counts flow through a sliding-window frequency
//! tracker, and crossing the hot threshold (or appearing in a prefetch
//! set) promotes a memory into the hot cache. A periodic sweep demotes
//! idle hot entries and copies long-idle warm rows down to cold.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fingerprint::fnv1a;
use crate::storage::{hot_key, parse_hot_key, DocumentStore, HotCache, ObjectStore};
use crate::types::{Memory, Tier};

/// Shards for the access counters, to avoid hot-key contention.
const FREQUENCY_SHARDS: usize = 16;

/// Sliding window over which hourly access counts are tracked.
fn frequency_window() -> ChronoDuration {
    ChronoDuration::hours(1)
}

/// Sharded sliding-window access counter keyed by `(user_id, memory_id)`.
pub struct FrequencyTracker {
    shards: Vec<Mutex<HashMap<(String, Uuid), VecDeque<DateTime<Utc>>>>>,
}

impl FrequencyTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..FREQUENCY_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, user_id: &str, memory_id: Uuid) -> &Mutex<HashMap<(String, Uuid), VecDeque<DateTime<Utc>>>> {
        let mut key = user_id.as_bytes().to_vec();
        key.extend_from_slice(memory_id.as_bytes());
        let index = (fnv1a(&key) as usize) % FREQUENCY_SHARDS;
        &self.shards[index]
    }

    /// Record one access and return the count within the sliding window.
    pub fn record(&self, user_id: &str, memory_id: Uuid, now: DateTime<Utc>) -> u32 {
        let mut shard = self.shard_for(user_id, memory_id).lock();
        let window = shard.entry((user_id.to_string(), memory_id)).or_default();
        window.push_back(now);
        let cutoff = now - frequency_window();
        while window.front().is_some_and(|at| *at < cutoff) {
            window.pop_front();
        }
        window.len() as u32
    }

    /// Current windowed count without recording an access.
    #[must_use]
    pub fn count(&self, user_id: &str, memory_id: Uuid, now: DateTime<Utc>) -> u32 {
        let shard = self.shard_for(user_id, memory_id).lock();
        shard
            .get(&(user_id.to_string(), memory_id))
            .map_or(0, |window| {
                let cutoff = now - frequency_window();
                window.iter().filter(|at| **at >= cutoff).count() as u32
            })
    }
}

impl Default for FrequencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Tier manager coordinating the hot cache, document store, and cold
/// object store.
pub struct TierManager {
    store: Arc<dyn DocumentStore>,
    hot: Arc<dyn HotCache>,
    cold: Arc<dyn ObjectStore>,
    tracker: FrequencyTracker,
    hot_threshold: u32,
    hot_ttl: Duration,
    warm_ttl: ChronoDuration,
}

impl TierManager {
    /// Create a tier manager from config and the three stores.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn DocumentStore>,
        hot: Arc<dyn HotCache>,
        cold: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            store,
            hot,
            cold,
            tracker: FrequencyTracker::new(),
            hot_threshold: config.hot_threshold_per_hour,
            hot_ttl: Duration::from_secs(config.hot_ttl_seconds),
            warm_ttl: ChronoDuration::seconds(config.warm_ttl_seconds as i64),
        }
    }

    /// Object-store key for a cold copy.
    #[must_use]
    pub fn cold_key(user_id: &str, memory_id: Uuid) -> String {
        format!("cold/{user_id}/{memory_id}")
    }

    /// Read a memory, hot tier first. Records the access and promotes on
    /// threshold crossing. Returns `None` when the memory does not exist.
    pub async fn load(&self, user_id: &str, memory_id: Uuid, now: DateTime<Utc>) -> Result<Option<Memory>> {
        let key = hot_key(user_id, memory_id);
        if let Some(memory) = self.hot.get(&key).await? {
            self.tracker.record(user_id, memory_id, now);
            return Ok(Some(memory));
        }

        let Some(mut memory) = self.store.get_memory(user_id, memory_id).await? else {
            return Ok(None);
        };

        // Hit from a lower tier: count it, and promote once the hourly
        // threshold is crossed.
        let count = self.tracker.record(user_id, memory_id, now);
        memory.access_count += 1;
        memory.last_accessed_at = now;
        self.store.put_memory(&memory).await?;

        if count >= self.hot_threshold {
            self.promote(&memory, self.hot_ttl, now).await?;
            memory.tier = Tier::Hot;
        }
        Ok(Some(memory))
    }

    /// Promote a memory into the hot tier with the given TTL. Idempotent:
    /// re-promoting refreshes the cache entry and leaves the tier field
    /// unchanged.
    pub async fn promote(&self, memory: &Memory, ttl: Duration, now: DateTime<Utc>) -> Result<()> {
        match memory.tier {
            Tier::Hot => {}
            from @ (Tier::Warm | Tier::Cold) => {
                // Compare-and-set; a concurrent promotion winning is fine.
                let _ = self
                    .store
                    .set_tier_cas(&memory.user_id, memory.id, from, Tier::Hot, now)
                    .await?;
                info!(memory_id = %memory.id, ?from, "memory promoted to hot");
            }
        }
        let mut hot_copy = memory.clone();
        hot_copy.tier = Tier::Hot;
        self.hot.put(&hot_key(&memory.user_id, memory.id), &hot_copy, ttl).await
    }

    /// Promote with the default hot TTL.
    pub async fn promote_default(&self, memory: &Memory, now: DateTime<Utc>) -> Result<()> {
        self.promote(memory, self.hot_ttl, now).await
    }

    /// Demotion sweep.
    ///
    /// Hot records whose cache entry has expired fall back to warm; warm
    /// rows unaccessed past the warm TTL are copied to cold storage and
    /// re-tiered, with the warm row kept for index locality.
    pub async fn demote_sweep(&self, now: DateTime<Utc>) -> Result<()> {
        let live_keys = self.hot.keys().await?;

        for user_id in self.store.list_user_ids().await? {
            for memory in self.store.list_memories(&user_id).await? {
                match memory.tier {
                    Tier::Hot => {
                        let key = hot_key(&user_id, memory.id);
                        if !live_keys.contains(&key) {
                            let demoted = self
                                .store
                                .set_tier_cas(&user_id, memory.id, Tier::Hot, Tier::Warm, memory.last_accessed_at)
                                .await?;
                            if demoted {
                                debug!(memory_id = %memory.id, "hot entry idle, demoted to warm");
                            }
                        }
                    }
                    Tier::Warm => {
                        if now - memory.last_accessed_at > self.warm_ttl {
                            let bytes = serde_json::to_vec(&memory)?;
                            self.cold.put(&Self::cold_key(&user_id, memory.id), bytes).await?;
                            let demoted = self
                                .store
                                .set_tier_cas(&user_id, memory.id, Tier::Warm, Tier::Cold, memory.last_accessed_at)
                                .await?;
                            if demoted {
                                debug!(memory_id = %memory.id, "warm row copied down to cold");
                            }
                        }
                    }
                    Tier::Cold => {}
                }
            }
        }
        Ok(())
    }

    /// Drop a memory's hot cache entry (eviction on forget/delete).
    pub async fn evict(&self, user_id: &str, memory_id: Uuid) -> Result<()> {
        self.hot.remove(&hot_key(user_id, memory_id)).await?;
        Ok(())
    }

    /// Windowed access count, for diagnostics and retrieval stats.
    #[must_use]
    pub fn hourly_count(&self, user_id: &str, memory_id: Uuid, now: DateTime<Utc>) -> u32 {
        self.tracker.count(user_id, memory_id, now)
    }

    /// Users with hot cache entries, derived from live keys.
    pub async fn hot_users(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self
            .hot
            .keys()
            .await?
            .iter()
            .filter_map(|key| parse_hot_key(key).map(|(user, _)| user))
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}
