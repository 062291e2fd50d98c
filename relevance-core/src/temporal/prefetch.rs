//! Anticipatory prefetch ahead of predicted access peaks.
//!
//! Runs on the maintenance cadence and on explicit `anticipate` calls;
//! both paths promote idempotently, so redundant firing is harmless. The
//! prefetcher never reaches across users.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::{ACCESS_LOG_RETENTION_DAYS, PREFETCH_TOP_N, PREFETCH_TTL_SECS};
use crate::error::Result;
use crate::storage::DocumentStore;
use crate::tier::TierManager;
use crate::types::{LifecycleState, PeriodicSlot, TemporalPattern};

/// Outcome of an anticipation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnticipateDecision {
    /// Whether a peak fell inside the look-ahead window.
    pub triggered: bool,
    /// Period of the matched slot, in hours.
    pub period_hours: Option<u32>,
    /// Matched peak offset within the period.
    pub peak_offset: Option<u32>,
    /// Memories promoted into the hot tier.
    pub memory_ids: Vec<Uuid>,
}

impl AnticipateDecision {
    fn none() -> Self {
        Self {
            triggered: false,
            period_hours: None,
            peak_offset: None,
            memory_ids: Vec::new(),
        }
    }
}

/// Prefetcher over the document store and tier manager.
pub struct Prefetcher {
    store: Arc<dyn DocumentStore>,
    tier: Arc<TierManager>,
}

impl Prefetcher {
    /// Create a prefetcher.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, tier: Arc<TierManager>) -> Self {
        Self { store, tier }
    }

    /// Check the user's pattern for a peak within `look_ahead` and promote
    /// the top matching memories into hot with a short TTL.
    pub async fn anticipate(
        &self,
        user_id: &str,
        look_ahead: Duration,
        now: DateTime<Utc>,
    ) -> Result<AnticipateDecision> {
        let Some(pattern) = self.store.get_pattern(user_id).await? else {
            return Ok(AnticipateDecision::none());
        };
        if !pattern.initial {
            debug!(user_id, "pattern not yet initial, skipping prefetch");
            return Ok(AnticipateDecision::none());
        }

        let Some((slot, offset)) = upcoming_peak(&pattern, look_ahead, now) else {
            return Ok(AnticipateDecision::none());
        };

        let memory_ids = self.promote_peak_set(user_id, &slot, offset, now).await?;
        info!(
            user_id,
            period = slot.period_hours,
            offset,
            promoted = memory_ids.len(),
            "anticipatory prefetch"
        );
        Ok(AnticipateDecision {
            triggered: true,
            period_hours: Some(slot.period_hours),
            peak_offset: Some(offset),
            memory_ids,
        })
    }

    /// Promote the top memories historically accessed at this peak,
    /// falling back to the most salient recent actives.
    async fn promote_peak_set(
        &self,
        user_id: &str,
        slot: &PeriodicSlot,
        offset: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let period = i64::from(slot.period_hours);
        let since = now - Duration::days(ACCESS_LOG_RETENTION_DAYS);
        let mut peak_hits: HashMap<Uuid, u32> = HashMap::new();
        for entry in self.store.list_access(user_id, since).await? {
            let Some(memory_id) = entry.memory_id else { continue };
            let hour = entry.at.timestamp() / 3600;
            if hour.rem_euclid(period) == i64::from(offset) {
                *peak_hits.entry(memory_id).or_default() += 1;
            }
        }

        let mut candidates: Vec<(Uuid, u32, f32)> = Vec::new();
        for memory in self.store.list_memories(user_id).await? {
            if memory.state != LifecycleState::Active {
                continue;
            }
            let hits = peak_hits.get(&memory.id).copied().unwrap_or(0);
            candidates.push((memory.id, hits, memory.salience.current_score));
        }
        // Peak-hour affinity first, salience as the tie-breaker.
        candidates.sort_by(|a, b| {
            b.1.cmp(&a.1).then(
                b.2.partial_cmp(&a.2)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        candidates.truncate(PREFETCH_TOP_N);

        let ttl = StdDuration::from_secs(PREFETCH_TTL_SECS);
        let mut promoted = Vec::new();
        for (memory_id, _, _) in candidates {
            if let Some(memory) = self.store.get_memory(user_id, memory_id).await? {
                self.tier.promote(&memory, ttl, now).await?;
                promoted.push(memory_id);
            }
        }
        Ok(promoted)
    }
}

/// Find the first peak across the pattern's slots that starts within
/// `look_ahead` of `now` (the current peak hour counts as upcoming).
fn upcoming_peak(
    pattern: &TemporalPattern,
    look_ahead: Duration,
    now: DateTime<Utc>,
) -> Option<(PeriodicSlot, u32)> {
    let slots = [&pattern.daily, &pattern.weekly, &pattern.monthly];
    let current_hour = now.timestamp() / 3600;

    let mut best: Option<(PeriodicSlot, u32, i64)> = None;
    for slot in slots.into_iter().flatten() {
        let period = i64::from(slot.period_hours);
        for &offset in &slot.peak_offsets {
            let current_offset = current_hour.rem_euclid(period);
            let hours_ahead = (i64::from(offset) - current_offset).rem_euclid(period);
            let peak_start = (current_hour + hours_ahead) * 3600;
            let in_window = if hours_ahead == 0 {
                true
            } else {
                peak_start - now.timestamp() <= look_ahead.num_seconds()
            };
            if in_window {
                let distance = (peak_start - now.timestamp()).max(0);
                if best.as_ref().is_none_or(|(_, _, d)| distance < *d) {
                    best = Some((slot.clone(), offset, distance));
                }
            }
        }
    }
    best.map(|(slot, offset, _)| (slot, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fingerprint::fingerprint;
    use crate::storage::memory::{InMemoryDocumentStore, InMemoryHotCache, InMemoryObjectStore};
    use crate::storage::{hot_key, HotCache};
    use crate::types::{AccessLogEntry, Memory};
    use chrono::TimeZone;

    fn pattern_daily_nine(user_id: &str) -> TemporalPattern {
        TemporalPattern {
            user_id: user_id.into(),
            daily: Some(PeriodicSlot {
                period_hours: 24,
                confidence: 0.8,
                peak_offsets: vec![9],
            }),
            weekly: None,
            monthly: None,
            initial: true,
            stable: false,
            observed_days: 30,
            computed_at: Utc::now(),
        }
    }

    fn fixture() -> (Prefetcher, Arc<InMemoryDocumentStore>, Arc<InMemoryHotCache>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let hot = Arc::new(InMemoryHotCache::with_capacity(64));
        let tier = Arc::new(TierManager::new(
            &EngineConfig::default(),
            store.clone(),
            hot.clone(),
            Arc::new(InMemoryObjectStore::new()),
        ));
        (Prefetcher::new(store.clone(), tier), store, hot)
    }

    async fn seed_memory(store: &InMemoryDocumentStore, text: &str, salience: f32) -> Memory {
        let mut memory = Memory::new("u1".into(), text.into(), fingerprint(text), Utc::now());
        memory.salience.current_score = salience;
        store.put_memory(&memory).await.unwrap();
        memory
    }

    #[tokio::test]
    async fn prefetch_fires_just_before_peak() {
        let (prefetcher, store, hot) = fixture();
        store.put_pattern(&pattern_daily_nine("u1")).await.unwrap();

        let morning = seed_memory(&store, "standup agenda", 70.0).await;
        let evening = seed_memory(&store, "dinner plan", 90.0).await;

        // Historical accesses: the standup note at 09:xx, dinner at 19:xx.
        for day in 1..=10 {
            let at = Utc.with_ymd_and_hms(2026, 3, day, 9, 10, 0).single().unwrap();
            store
                .append_access(&AccessLogEntry {
                    user_id: "u1".into(),
                    memory_id: Some(morning.id),
                    at,
                })
                .await
                .unwrap();
            let at = Utc.with_ymd_and_hms(2026, 3, day, 19, 10, 0).single().unwrap();
            store
                .append_access(&AccessLogEntry {
                    user_id: "u1".into(),
                    memory_id: Some(evening.id),
                    at,
                })
                .await
                .unwrap();
        }

        let now = Utc.with_ymd_and_hms(2026, 3, 15, 8, 50, 0).single().unwrap();
        let decision = prefetcher
            .anticipate("u1", Duration::minutes(15), now)
            .await
            .unwrap();

        assert!(decision.triggered);
        assert_eq!(decision.peak_offset, Some(9));
        // The morning memory ranks first by peak affinity.
        assert_eq!(decision.memory_ids.first(), Some(&morning.id));
        assert!(hot.get(&hot_key("u1", morning.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn no_trigger_far_from_peak() {
        let (prefetcher, store, _) = fixture();
        store.put_pattern(&pattern_daily_nine("u1")).await.unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 15, 14, 0, 0).single().unwrap();
        let decision = prefetcher
            .anticipate("u1", Duration::minutes(15), now)
            .await
            .unwrap();
        assert!(!decision.triggered);
    }

    #[tokio::test]
    async fn non_initial_pattern_never_prefetches() {
        let (prefetcher, store, _) = fixture();
        let mut pattern = pattern_daily_nine("u1");
        pattern.initial = false;
        store.put_pattern(&pattern).await.unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 15, 8, 55, 0).single().unwrap();
        let decision = prefetcher
            .anticipate("u1", Duration::minutes(15), now)
            .await
            .unwrap();
        assert!(!decision.triggered);
    }
}
