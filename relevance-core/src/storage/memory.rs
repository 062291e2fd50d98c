//! In-process store implementations.
//!
//! Used by tests and single-node deployments. The document store keeps
//! everything in hash maps behind short-lived locks; the vector index
//! brute-forces cosine similarity, which is adequate at in-process scale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::constants::HOT_CACHE_CAPACITY;
use crate::embeddings::cosine_similarity;
use crate::error::Result;
use crate::storage::{DocumentStore, HotCache, ObjectStore, VectorIndex, VectorMatch};
use crate::types::{
    AccessLogEntry, AuditEntry, ContextFrame, Entity, Memory, NotificationRecord, OpenLoop,
    RecallSession, Relationship, TemporalPattern,
};

type UserKey = (String, Uuid);

/// In-memory document store.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    memories: RwLock<HashMap<UserKey, Memory>>,
    entities: RwLock<HashMap<UserKey, Entity>>,
    relationships: RwLock<HashMap<(String, Uuid, Uuid), Relationship>>,
    loops: RwLock<HashMap<UserKey, OpenLoop>>,
    frames: RwLock<HashMap<String, Vec<ContextFrame>>>,
    patterns: RwLock<HashMap<String, TemporalPattern>>,
    access_log: RwLock<HashMap<String, Vec<AccessLogEntry>>>,
    sessions: RwLock<HashMap<UserKey, RecallSession>>,
    notifications: RwLock<Vec<NotificationRecord>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded so far (test visibility).
    #[must_use]
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.read().clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put_memory(&self, memory: &Memory) -> Result<()> {
        self.memories
            .write()
            .insert((memory.user_id.clone(), memory.id), memory.clone());
        Ok(())
    }

    async fn get_memory(&self, user_id: &str, id: Uuid) -> Result<Option<Memory>> {
        Ok(self
            .memories
            .read()
            .get(&(user_id.to_string(), id))
            .cloned())
    }

    async fn find_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Memory>> {
        Ok(self
            .memories
            .read()
            .values()
            .filter(|m| m.user_id == user_id && m.fingerprint == fingerprint)
            .filter(|m| m.state != crate::types::LifecycleState::Deleted)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn list_memories(&self, user_id: &str) -> Result<Vec<Memory>> {
        Ok(self
            .memories
            .read()
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_tier_cas(
        &self,
        user_id: &str,
        id: Uuid,
        from: crate::types::Tier,
        to: crate::types::Tier,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut memories = self.memories.write();
        match memories.get_mut(&(user_id.to_string(), id)) {
            Some(memory) if memory.tier == from => {
                memory.tier = to;
                memory.last_accessed_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_user_ids(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self
            .memories
            .read()
            .keys()
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn put_entity(&self, entity: &Entity) -> Result<()> {
        self.entities
            .write()
            .insert((entity.user_id.clone(), entity.id), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, user_id: &str, id: Uuid) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .get(&(user_id.to_string(), id))
            .cloned())
    }

    async fn find_entity_by_name(&self, user_id: &str, name: &str) -> Result<Option<Entity>> {
        let lower = name.to_lowercase();
        Ok(self
            .entities
            .read()
            .values()
            .find(|e| e.user_id == user_id && e.name.to_lowercase() == lower)
            .cloned())
    }

    async fn list_entities(&self, user_id: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn put_relationship(&self, relationship: &Relationship) -> Result<()> {
        self.relationships.write().insert(
            (
                relationship.user_id.clone(),
                relationship.source_id,
                relationship.target_id,
            ),
            relationship.clone(),
        );
        Ok(())
    }

    async fn get_relationship(
        &self,
        user_id: &str,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<Option<Relationship>> {
        Ok(self
            .relationships
            .read()
            .get(&(user_id.to_string(), source_id, target_id))
            .cloned())
    }

    async fn list_relationships_from(
        &self,
        user_id: &str,
        source_id: Uuid,
    ) -> Result<Vec<Relationship>> {
        Ok(self
            .relationships
            .read()
            .values()
            .filter(|r| r.user_id == user_id && r.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn put_loop(&self, open_loop: &OpenLoop) -> Result<()> {
        self.loops
            .write()
            .insert((open_loop.user_id.clone(), open_loop.id), open_loop.clone());
        Ok(())
    }

    async fn get_loop(&self, user_id: &str, id: Uuid) -> Result<Option<OpenLoop>> {
        Ok(self.loops.read().get(&(user_id.to_string(), id)).cloned())
    }

    async fn list_loops(&self, user_id: &str) -> Result<Vec<OpenLoop>> {
        Ok(self
            .loops
            .read()
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn close_loop_cas(
        &self,
        user_id: &str,
        id: Uuid,
        to: crate::types::LoopState,
        now: DateTime<Utc>,
    ) -> Result<Option<OpenLoop>> {
        let mut loops = self.loops.write();
        match loops.get_mut(&(user_id.to_string(), id)) {
            Some(open_loop) => {
                if open_loop.state.is_terminal() {
                    return Err(crate::error::Error::Semantic(format!(
                        "loop {id} is already {:?}",
                        open_loop.state
                    )));
                }
                open_loop.state = to;
                open_loop.updated_at = now;
                Ok(Some(open_loop.clone()))
            }
            None => Ok(None),
        }
    }

    async fn put_frame(&self, frame: &ContextFrame) -> Result<()> {
        let mut frames = self.frames.write();
        let user_frames = frames.entry(frame.user_id.clone()).or_default();
        if let Some(position) = user_frames.iter().position(|f| f.id == frame.id) {
            user_frames[position] = frame.clone();
        } else {
            user_frames.push(frame.clone());
        }
        Ok(())
    }

    async fn get_active_frame(&self, user_id: &str) -> Result<Option<ContextFrame>> {
        Ok(self
            .frames
            .read()
            .get(user_id)
            .and_then(|frames| frames.iter().find(|f| f.active).cloned()))
    }

    async fn list_frames(&self, user_id: &str) -> Result<Vec<ContextFrame>> {
        let mut frames = self.frames.read().get(user_id).cloned().unwrap_or_default();
        frames.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(frames)
    }

    async fn prune_frames(&self, user_id: &str, keep: usize) -> Result<()> {
        let mut frames = self.frames.write();
        if let Some(user_frames) = frames.get_mut(user_id) {
            user_frames.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            user_frames.truncate(keep);
        }
        Ok(())
    }

    async fn put_pattern(&self, pattern: &TemporalPattern) -> Result<()> {
        self.patterns
            .write()
            .insert(pattern.user_id.clone(), pattern.clone());
        Ok(())
    }

    async fn get_pattern(&self, user_id: &str) -> Result<Option<TemporalPattern>> {
        Ok(self.patterns.read().get(user_id).cloned())
    }

    async fn append_access(&self, entry: &AccessLogEntry) -> Result<()> {
        self.access_log
            .write()
            .entry(entry.user_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_access(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessLogEntry>> {
        let mut entries: Vec<AccessLogEntry> = self
            .access_log
            .read()
            .get(user_id)
            .map(|entries| entries.iter().filter(|e| e.at >= since).cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.at);
        Ok(entries)
    }

    async fn prune_access(&self, user_id: &str, before: DateTime<Utc>) -> Result<()> {
        if let Some(entries) = self.access_log.write().get_mut(user_id) {
            entries.retain(|e| e.at >= before);
        }
        Ok(())
    }

    async fn put_session(&self, session: &RecallSession) -> Result<()> {
        self.sessions
            .write()
            .insert((session.user_id.clone(), session.id), session.clone());
        Ok(())
    }

    async fn get_session(&self, user_id: &str, id: Uuid) -> Result<Option<RecallSession>> {
        Ok(self
            .sessions
            .read()
            .get(&(user_id.to_string(), id))
            .cloned())
    }

    async fn delete_session(&self, user_id: &str, id: Uuid) -> Result<bool> {
        Ok(self
            .sessions
            .write()
            .remove(&(user_id.to_string(), id))
            .is_some())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<RecallSession>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_notification(&self, record: &NotificationRecord) -> Result<()> {
        self.notifications.write().push(record.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        entity_id: Uuid,
    ) -> Result<Vec<NotificationRecord>> {
        let mut records: Vec<NotificationRecord> = self
            .notifications
            .read()
            .iter()
            .filter(|n| n.user_id == user_id && n.entity_id == entity_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.write().push(entry.clone());
        Ok(())
    }
}

/// In-memory vector index with brute-force cosine search.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    vectors: RwLock<HashMap<UserKey, (Vec<f32>, i64)>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        user_id: &str,
        memory_id: Uuid,
        embedding: Vec<f32>,
        logical_ts: i64,
    ) -> Result<()> {
        let mut vectors = self.vectors.write();
        let key = (user_id.to_string(), memory_id);
        match vectors.get(&key) {
            // Stale write: a newer embedding is already stored.
            Some((_, stored_ts)) if *stored_ts > logical_ts => Ok(()),
            _ => {
                vectors.insert(key, (embedding, logical_ts));
                Ok(())
            }
        }
    }

    async fn query(&self, user_id: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let mut matches: Vec<VectorMatch> = self
            .vectors
            .read()
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((_, memory_id), (vector, _))| VectorMatch {
                memory_id: *memory_id,
                similarity: cosine_similarity(embedding, vector),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn get(&self, user_id: &str, memory_id: Uuid) -> Result<Option<Vec<f32>>> {
        Ok(self
            .vectors
            .read()
            .get(&(user_id.to_string(), memory_id))
            .map(|(vector, _)| vector.clone()))
    }

    async fn remove(&self, user_id: &str, memory_id: Uuid) -> Result<bool> {
        Ok(self
            .vectors
            .write()
            .remove(&(user_id.to_string(), memory_id))
            .is_some())
    }
}

struct HotEntry {
    memory: Memory,
    expires_at: Instant,
    ttl: Duration,
}

/// In-memory hot cache: LRU with sliding TTL.
///
/// At capacity the least recently used live entry is evicted before a new
/// one is inserted.
pub struct InMemoryHotCache {
    entries: Mutex<LruCache<String, HotEntry>>,
}

impl InMemoryHotCache {
    /// Create a cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HOT_CACHE_CAPACITY)
    }

    /// Create a cache bounded to `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for InMemoryHotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HotCache for InMemoryHotCache {
    async fn put(&self, key: &str, memory: &Memory, ttl: Duration) -> Result<()> {
        self.entries.lock().put(
            key.to_string(),
            HotEntry {
                memory: memory.clone(),
                expires_at: Instant::now() + ttl,
                ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Memory>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let live = match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                // Sliding TTL: every hit pushes expiry out.
                entry.expires_at = now + entry.ttl;
                Some(entry.memory.clone())
            }
            Some(_) => None,
            None => return Ok(None),
        };
        if live.is_none() {
            entries.pop(key);
        }
        Ok(live)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().pop(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .count())
    }
}

/// In-memory object store for the cold tier.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.write().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::hot_key;

    fn test_memory(user_id: &str, text: &str) -> Memory {
        Memory::new(
            user_id.to_string(),
            text.to_string(),
            crate::fingerprint::fingerprint(text),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn fingerprint_lookup_skips_deleted() {
        let store = InMemoryDocumentStore::new();
        let mut memory = test_memory("u1", "hello");
        store.put_memory(&memory).await.unwrap();
        assert!(store
            .find_by_fingerprint("u1", &memory.fingerprint)
            .await
            .unwrap()
            .is_some());

        memory.state = crate::types::LifecycleState::Deleted;
        store.put_memory(&memory).await.unwrap();
        assert!(store
            .find_by_fingerprint("u1", &memory.fingerprint)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn vector_index_discards_stale_writes() {
        let index = InMemoryVectorIndex::new();
        let id = Uuid::new_v4();
        index.upsert("u1", id, vec![1.0, 0.0], 100).await.unwrap();
        index.upsert("u1", id, vec![0.0, 1.0], 50).await.unwrap();
        assert_eq!(index.get("u1", id).await.unwrap(), Some(vec![1.0, 0.0]));

        index.upsert("u1", id, vec![0.5, 0.5], 200).await.unwrap();
        assert_eq!(index.get("u1", id).await.unwrap(), Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn vector_query_is_user_scoped() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("u1", Uuid::new_v4(), vec![1.0, 0.0], 1)
            .await
            .unwrap();
        index
            .upsert("u2", Uuid::new_v4(), vec![1.0, 0.0], 1)
            .await
            .unwrap();
        let matches = index.query("u1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn hot_cache_evicts_lru_at_capacity() {
        let cache = InMemoryHotCache::with_capacity(2);
        let ttl = Duration::from_secs(60);
        let a = test_memory("u1", "a");
        let b = test_memory("u1", "b");
        let c = test_memory("u1", "c");
        cache.put(&hot_key("u1", a.id), &a, ttl).await.unwrap();
        cache.put(&hot_key("u1", b.id), &b, ttl).await.unwrap();
        // Touch `a` so `b` becomes LRU.
        cache.get(&hot_key("u1", a.id)).await.unwrap();
        cache.put(&hot_key("u1", c.id), &c, ttl).await.unwrap();

        assert!(cache.get(&hot_key("u1", a.id)).await.unwrap().is_some());
        assert!(cache.get(&hot_key("u1", b.id)).await.unwrap().is_none());
        assert!(cache.get(&hot_key("u1", c.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn hot_cache_expires_entries() {
        let cache = InMemoryHotCache::with_capacity(4);
        let memory = test_memory("u1", "short lived");
        let key = hot_key("u1", memory.id);
        cache
            .put(&key, &memory, Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[test]
    fn hot_key_round_trips() {
        let id = Uuid::new_v4();
        let key = hot_key("user:with:colons", id);
        let (user, parsed) = crate::storage::parse_hot_key(&key).unwrap();
        assert_eq!(user, "user:with:colons");
        assert_eq!(parsed, id);
    }
}
