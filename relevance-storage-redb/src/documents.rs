//! Durable document store over redb.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use relevance_core::types::{
    AccessLogEntry, AuditEntry, ContextFrame, Entity, LifecycleState, LoopState, Memory,
    NotificationRecord, OpenLoop, RecallSession, Relationship, TemporalPattern, Tier,
};
use relevance_core::{DocumentStore, Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tables;
use crate::{decode, encode, get_raw, insert_raw, remove_keys, scan_prefix, storage_err};

/// Single-node durable document store.
///
/// One redb file holds every aggregate; keys are user-prefixed so reads
/// never cross users. Writes of distinct memories for a user serialize on
/// redb's single-writer transaction, which is the engine's linearization
/// point.
pub struct RedbDocumentStore {
    db: Arc<Database>,
}

impl RedbDocumentStore {
    /// Open (or create) the store at `path`, creating all tables so later
    /// read transactions never race table creation.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| storage_err("open database", e))?;
        let write_txn = db.begin_write().map_err(|e| storage_err("begin write", e))?;
        for table in tables::ALL_DOCUMENT_TABLES {
            write_txn
                .open_table(table)
                .map_err(|e| storage_err("create table", e))?;
        }
        write_txn.commit().map_err(|e| storage_err("commit", e))?;
        info!(?path, "redb document store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Share the underlying database with an [`crate::RedbObjectStore`].
    #[must_use]
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    fn key2(user_id: &str, id: impl std::fmt::Display) -> String {
        format!("{user_id}/{id}")
    }

    fn user_prefix(user_id: &str) -> String {
        format!("{user_id}/")
    }
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn put_memory(&self, memory: &Memory) -> Result<()> {
        debug!(memory_id = %memory.id, "storing memory");
        insert_raw(
            self.db.clone(),
            tables::MEMORIES,
            Self::key2(&memory.user_id, memory.id),
            encode(memory)?,
        )
        .await
    }

    async fn get_memory(&self, user_id: &str, id: Uuid) -> Result<Option<Memory>> {
        match get_raw(self.db.clone(), tables::MEMORIES, Self::key2(user_id, id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Memory>> {
        let rows = scan_prefix(
            self.db.clone(),
            tables::MEMORIES,
            Self::user_prefix(user_id),
        )
        .await?;
        let mut newest: Option<Memory> = None;
        for (_, bytes) in rows {
            let memory: Memory = decode(&bytes)?;
            if memory.fingerprint == fingerprint && memory.state != LifecycleState::Deleted {
                if newest
                    .as_ref()
                    .is_none_or(|current| memory.created_at > current.created_at)
                {
                    newest = Some(memory);
                }
            }
        }
        Ok(newest)
    }

    async fn list_memories(&self, user_id: &str) -> Result<Vec<Memory>> {
        scan_prefix(
            self.db.clone(),
            tables::MEMORIES,
            Self::user_prefix(user_id),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect()
    }

    async fn set_tier_cas(
        &self,
        user_id: &str,
        id: Uuid,
        from: Tier,
        to: Tier,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.clone();
        let key = Self::key2(user_id, id);
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(|e| storage_err("begin write", e))?;
            let swapped = {
                let mut table = write_txn
                    .open_table(tables::MEMORIES)
                    .map_err(|e| storage_err("open table", e))?;
                let current = match table.get(key.as_str()).map_err(|e| storage_err("get", e))? {
                    Some(guard) => Some(decode::<Memory>(guard.value())?),
                    None => None,
                };
                match current {
                    Some(mut memory) if memory.tier == from => {
                        memory.tier = to;
                        memory.last_accessed_at = now;
                        let bytes = encode(&memory)?;
                        table
                            .insert(key.as_str(), bytes.as_slice())
                            .map_err(|e| storage_err("insert", e))?;
                        true
                    }
                    _ => false,
                }
            };
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(swapped)
        })
        .await
        .map_err(|e| storage_err("join", e))?
    }

    async fn list_user_ids(&self) -> Result<Vec<String>> {
        let rows = scan_prefix(self.db.clone(), tables::MEMORIES, String::new()).await?;
        let mut users: Vec<String> = rows
            .iter()
            .filter_map(|(key, _)| key.split_once('/').map(|(user, _)| user.to_string()))
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn put_entity(&self, entity: &Entity) -> Result<()> {
        insert_raw(
            self.db.clone(),
            tables::ENTITIES,
            Self::key2(&entity.user_id, entity.id),
            encode(entity)?,
        )
        .await
    }

    async fn get_entity(&self, user_id: &str, id: Uuid) -> Result<Option<Entity>> {
        match get_raw(self.db.clone(), tables::ENTITIES, Self::key2(user_id, id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_entity_by_name(&self, user_id: &str, name: &str) -> Result<Option<Entity>> {
        let lower = name.to_lowercase();
        for entity in self.list_entities(user_id).await? {
            if entity.name.to_lowercase() == lower {
                return Ok(Some(entity));
            }
        }
        Ok(None)
    }

    async fn list_entities(&self, user_id: &str) -> Result<Vec<Entity>> {
        scan_prefix(
            self.db.clone(),
            tables::ENTITIES,
            Self::user_prefix(user_id),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect()
    }

    async fn put_relationship(&self, relationship: &Relationship) -> Result<()> {
        let key = format!(
            "{}/{}/{}",
            relationship.user_id, relationship.source_id, relationship.target_id
        );
        insert_raw(
            self.db.clone(),
            tables::RELATIONSHIPS,
            key,
            encode(relationship)?,
        )
        .await
    }

    async fn get_relationship(
        &self,
        user_id: &str,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<Option<Relationship>> {
        let key = format!("{user_id}/{source_id}/{target_id}");
        match get_raw(self.db.clone(), tables::RELATIONSHIPS, key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_relationships_from(
        &self,
        user_id: &str,
        source_id: Uuid,
    ) -> Result<Vec<Relationship>> {
        scan_prefix(
            self.db.clone(),
            tables::RELATIONSHIPS,
            format!("{user_id}/{source_id}/"),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect()
    }

    async fn put_loop(&self, open_loop: &OpenLoop) -> Result<()> {
        insert_raw(
            self.db.clone(),
            tables::OPEN_LOOPS,
            Self::key2(&open_loop.user_id, open_loop.id),
            encode(open_loop)?,
        )
        .await
    }

    async fn get_loop(&self, user_id: &str, id: Uuid) -> Result<Option<OpenLoop>> {
        match get_raw(self.db.clone(), tables::OPEN_LOOPS, Self::key2(user_id, id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_loops(&self, user_id: &str) -> Result<Vec<OpenLoop>> {
        scan_prefix(
            self.db.clone(),
            tables::OPEN_LOOPS,
            Self::user_prefix(user_id),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect()
    }

    async fn close_loop_cas(
        &self,
        user_id: &str,
        id: Uuid,
        to: LoopState,
        now: DateTime<Utc>,
    ) -> Result<Option<OpenLoop>> {
        let db = self.db.clone();
        let key = Self::key2(user_id, id);
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(|e| storage_err("begin write", e))?;
            let outcome = {
                let mut table = write_txn
                    .open_table(tables::OPEN_LOOPS)
                    .map_err(|e| storage_err("open table", e))?;
                let current = match table.get(key.as_str()).map_err(|e| storage_err("get", e))? {
                    Some(guard) => Some(decode::<OpenLoop>(guard.value())?),
                    None => None,
                };
                match current {
                    Some(mut open_loop) => {
                        if open_loop.state.is_terminal() {
                            return Err(Error::Semantic(format!(
                                "loop {id} is already {:?}",
                                open_loop.state
                            )));
                        }
                        open_loop.state = to;
                        open_loop.updated_at = now;
                        let bytes = encode(&open_loop)?;
                        table
                            .insert(key.as_str(), bytes.as_slice())
                            .map_err(|e| storage_err("insert", e))?;
                        Some(open_loop)
                    }
                    None => None,
                }
            };
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(outcome)
        })
        .await
        .map_err(|e| storage_err("join", e))?
    }

    async fn put_frame(&self, frame: &ContextFrame) -> Result<()> {
        insert_raw(
            self.db.clone(),
            tables::CONTEXT_FRAMES,
            Self::key2(&frame.user_id, frame.id),
            encode(frame)?,
        )
        .await
    }

    async fn get_active_frame(&self, user_id: &str) -> Result<Option<ContextFrame>> {
        for frame in self.list_frames(user_id).await? {
            if frame.active {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    async fn list_frames(&self, user_id: &str) -> Result<Vec<ContextFrame>> {
        let mut frames: Vec<ContextFrame> = scan_prefix(
            self.db.clone(),
            tables::CONTEXT_FRAMES,
            Self::user_prefix(user_id),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect::<Result<_>>()?;
        frames.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(frames)
    }

    async fn prune_frames(&self, user_id: &str, keep: usize) -> Result<()> {
        let frames = self.list_frames(user_id).await?;
        if frames.len() <= keep {
            return Ok(());
        }
        let doomed: Vec<String> = frames[keep..]
            .iter()
            .map(|frame| Self::key2(user_id, frame.id))
            .collect();
        remove_keys(self.db.clone(), tables::CONTEXT_FRAMES, doomed).await
    }

    async fn put_pattern(&self, pattern: &TemporalPattern) -> Result<()> {
        insert_raw(
            self.db.clone(),
            tables::TEMPORAL_PATTERNS,
            pattern.user_id.clone(),
            encode(pattern)?,
        )
        .await
    }

    async fn get_pattern(&self, user_id: &str) -> Result<Option<TemporalPattern>> {
        match get_raw(
            self.db.clone(),
            tables::TEMPORAL_PATTERNS,
            user_id.to_string(),
        )
        .await?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn append_access(&self, entry: &AccessLogEntry) -> Result<()> {
        // Timestamp-ordered keys keep range reads in time order.
        let key = format!(
            "{}/{:020}/{}",
            entry.user_id,
            entry.at.timestamp_micros(),
            Uuid::new_v4()
        );
        insert_raw(self.db.clone(), tables::ACCESS_LOG, key, encode(entry)?).await
    }

    async fn list_access(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessLogEntry>> {
        let mut entries: Vec<AccessLogEntry> = scan_prefix(
            self.db.clone(),
            tables::ACCESS_LOG,
            Self::user_prefix(user_id),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect::<Result<_>>()?;
        entries.retain(|entry| entry.at >= since);
        entries.sort_by_key(|entry| entry.at);
        Ok(entries)
    }

    async fn prune_access(&self, user_id: &str, before: DateTime<Utc>) -> Result<()> {
        let rows = scan_prefix(
            self.db.clone(),
            tables::ACCESS_LOG,
            Self::user_prefix(user_id),
        )
        .await?;
        let mut doomed = Vec::new();
        for (key, bytes) in rows {
            let entry: AccessLogEntry = decode(&bytes)?;
            if entry.at < before {
                doomed.push(key);
            }
        }
        remove_keys(self.db.clone(), tables::ACCESS_LOG, doomed).await
    }

    async fn put_session(&self, session: &RecallSession) -> Result<()> {
        insert_raw(
            self.db.clone(),
            tables::RECALL_SESSIONS,
            Self::key2(&session.user_id, session.id),
            encode(session)?,
        )
        .await
    }

    async fn get_session(&self, user_id: &str, id: Uuid) -> Result<Option<RecallSession>> {
        match get_raw(
            self.db.clone(),
            tables::RECALL_SESSIONS,
            Self::key2(user_id, id),
        )
        .await?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_session(&self, user_id: &str, id: Uuid) -> Result<bool> {
        crate::remove_raw(
            self.db.clone(),
            tables::RECALL_SESSIONS,
            Self::key2(user_id, id),
        )
        .await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<RecallSession>> {
        scan_prefix(
            self.db.clone(),
            tables::RECALL_SESSIONS,
            Self::user_prefix(user_id),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect()
    }

    async fn append_notification(&self, record: &NotificationRecord) -> Result<()> {
        let key = format!(
            "{}/{}/{:020}/{}",
            record.user_id,
            record.entity_id,
            record.created_at.timestamp_micros(),
            record.id
        );
        insert_raw(self.db.clone(), tables::NOTIFICATIONS, key, encode(record)?).await
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        entity_id: Uuid,
    ) -> Result<Vec<NotificationRecord>> {
        let mut records: Vec<NotificationRecord> = scan_prefix(
            self.db.clone(),
            tables::NOTIFICATIONS,
            format!("{user_id}/{entity_id}/"),
        )
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect::<Result<_>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let key = format!(
            "{}/{:020}/{}",
            entry.user_id,
            entry.at.timestamp_micros(),
            entry.id
        );
        insert_raw(self.db.clone(), tables::AUDIT, key, encode(entry)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relevance_core::fingerprint::fingerprint;

    fn open_store() -> (RedbDocumentStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbDocumentStore::open(&dir.path().join("test.redb")).unwrap();
        (store, dir)
    }

    fn memory(user_id: &str, text: &str) -> Memory {
        Memory::new(
            user_id.to_string(),
            text.to_string(),
            fingerprint(text),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn memory_round_trip() {
        let (store, _dir) = open_store();
        let stored = memory("u1", "hello redb");
        store.put_memory(&stored).await.unwrap();
        let loaded = store.get_memory("u1", stored.id).await.unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn fingerprint_lookup_and_user_scoping() {
        let (store, _dir) = open_store();
        let mine = memory("u1", "shared text");
        let theirs = memory("u2", "shared text");
        store.put_memory(&mine).await.unwrap();
        store.put_memory(&theirs).await.unwrap();

        let found = store
            .find_by_fingerprint("u1", &mine.fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, mine.id);
        assert_eq!(store.list_memories("u1").await.unwrap().len(), 1);
        assert_eq!(store.list_user_ids().await.unwrap(), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn tier_cas_swaps_only_from_expected() {
        let (store, _dir) = open_store();
        let stored = memory("u1", "tiered");
        store.put_memory(&stored).await.unwrap();

        let now = Utc::now();
        assert!(store
            .set_tier_cas("u1", stored.id, Tier::Warm, Tier::Hot, now)
            .await
            .unwrap());
        // Second CAS from Warm fails: the memory is already Hot.
        assert!(!store
            .set_tier_cas("u1", stored.id, Tier::Warm, Tier::Cold, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn loop_cas_rejects_terminal() {
        let (store, _dir) = open_store();
        let now = Utc::now();
        let open_loop = OpenLoop {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            kind: relevance_core::LoopKind::YouOweThem,
            counterparty_id: Uuid::new_v4(),
            description: "send the budget".into(),
            description_fingerprint: fingerprint("send the budget"),
            memory_id: Uuid::new_v4(),
            due_at: None,
            state: LoopState::Open,
            created_at: now,
            updated_at: now,
            last_mentioned_at: now,
        };
        store.put_loop(&open_loop).await.unwrap();

        let closed = store
            .close_loop_cas("u1", open_loop.id, LoopState::Done, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.state, LoopState::Done);

        let error = store
            .close_loop_cas("u1", open_loop.id, LoopState::Cancelled, now)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Semantic(_)));
    }

    #[tokio::test]
    async fn access_log_is_time_ordered_and_prunable() {
        let (store, _dir) = open_store();
        let base = Utc::now();
        for offset in [30_i64, 10, 20] {
            store
                .append_access(&AccessLogEntry {
                    user_id: "u1".into(),
                    memory_id: None,
                    at: base - chrono::Duration::days(offset),
                })
                .await
                .unwrap();
        }

        let all = store
            .list_access("u1", base - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].at <= pair[1].at));

        store
            .prune_access("u1", base - chrono::Duration::days(15))
            .await
            .unwrap();
        let remaining = store
            .list_access("u1", base - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn frames_prune_keeps_newest() {
        let (store, _dir) = open_store();
        let base = Utc::now();
        for index in 0..5_i64 {
            let frame = ContextFrame {
                id: Uuid::new_v4(),
                user_id: "u1".into(),
                location: None,
                people: vec![],
                activity: None,
                project: Some(format!("p{index}")),
                tags: vec![],
                started_at: base + chrono::Duration::seconds(index),
                expires_at: base + chrono::Duration::hours(4),
                active: index == 4,
            };
            store.put_frame(&frame).await.unwrap();
        }

        store.prune_frames("u1", 2).await.unwrap();
        let frames = store.list_frames("u1").await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].project.as_deref(), Some("p4"));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.redb");
        let stored = memory("u1", "durable note");
        {
            let store = RedbDocumentStore::open(&path).unwrap();
            store.put_memory(&stored).await.unwrap();
        }
        let store = RedbDocumentStore::open(&path).unwrap();
        let loaded = store.get_memory("u1", stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.text, "durable note");
    }
}
