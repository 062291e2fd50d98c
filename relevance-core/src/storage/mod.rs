//! # Storage Abstraction
//!
//! Traits for the three backing stores the engine coordinates: the
//! document store (source of truth), the vector index and hot cache
//! (rebuildable projections), and cold object storage.
//!
//! The engine does not re-implement any of these; `memory` provides
//! in-process implementations for tests and single-node use, and the
//! redb binding crate provides an embedded durable document store.

pub mod circuit_breaker;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    AccessLogEntry, AuditEntry, ContextFrame, Entity, Memory, NotificationRecord, OpenLoop,
    RecallSession, Relationship, TemporalPattern,
};

/// A match returned by a vector query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// Memory the vector belongs to.
    pub memory_id: Uuid,
    /// Similarity in [0, 1], higher is closer.
    pub similarity: f32,
}

/// Document store: the sole authority for every aggregate.
///
/// Writes of distinct memories for one user are serialized by the store;
/// the memory write is the engine's linearization point.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ---- memories ----

    /// Insert or replace a memory record.
    async fn put_memory(&self, memory: &Memory) -> Result<()>;

    /// Fetch a memory by id.
    async fn get_memory(&self, user_id: &str, id: Uuid) -> Result<Option<Memory>>;

    /// Find a non-deleted memory by fingerprint, for dedup.
    async fn find_by_fingerprint(&self, user_id: &str, fingerprint: &str)
        -> Result<Option<Memory>>;

    /// All memories for a user, unordered. Maintenance and export iterate
    /// this; interactive reads go through the vector index instead.
    async fn list_memories(&self, user_id: &str) -> Result<Vec<Memory>>;

    /// Atomically move a memory from tier `from` to tier `to`, stamping
    /// `last_accessed_at`. Returns false when the memory is missing or no
    /// longer in `from` (a concurrent transition won).
    async fn set_tier_cas(
        &self,
        user_id: &str,
        id: Uuid,
        from: crate::types::Tier,
        to: crate::types::Tier,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Users with at least one stored record, for maintenance sweeps.
    async fn list_user_ids(&self) -> Result<Vec<String>>;

    // ---- entities ----

    /// Insert or replace an entity.
    async fn put_entity(&self, entity: &Entity) -> Result<()>;

    /// Fetch an entity by id.
    async fn get_entity(&self, user_id: &str, id: Uuid) -> Result<Option<Entity>>;

    /// Case-insensitive exact name lookup.
    async fn find_entity_by_name(&self, user_id: &str, name: &str) -> Result<Option<Entity>>;

    /// All entities for a user.
    async fn list_entities(&self, user_id: &str) -> Result<Vec<Entity>>;

    // ---- relationships ----

    /// Insert or replace a relationship edge.
    async fn put_relationship(&self, relationship: &Relationship) -> Result<()>;

    /// Fetch the edge from `source_id` to `target_id`.
    async fn get_relationship(
        &self,
        user_id: &str,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<Option<Relationship>>;

    /// All edges leaving `source_id`.
    async fn list_relationships_from(
        &self,
        user_id: &str,
        source_id: Uuid,
    ) -> Result<Vec<Relationship>>;

    // ---- open loops ----

    /// Insert or replace an open loop.
    async fn put_loop(&self, open_loop: &OpenLoop) -> Result<()>;

    /// Fetch a loop by id.
    async fn get_loop(&self, user_id: &str, id: Uuid) -> Result<Option<OpenLoop>>;

    /// All loops for a user.
    async fn list_loops(&self, user_id: &str) -> Result<Vec<OpenLoop>>;

    /// Atomically transition a loop from `Open` to `to`.
    ///
    /// Returns the updated loop, or `None` when no loop with that id
    /// exists. A loop already in a terminal state is left untouched and
    /// reported as a semantic error: terminal states never transition.
    async fn close_loop_cas(
        &self,
        user_id: &str,
        id: Uuid,
        to: crate::types::LoopState,
        now: DateTime<Utc>,
    ) -> Result<Option<OpenLoop>>;

    // ---- context frames ----

    /// Insert or replace a context frame.
    async fn put_frame(&self, frame: &ContextFrame) -> Result<()>;

    /// The user's single active frame, if any.
    async fn get_active_frame(&self, user_id: &str) -> Result<Option<ContextFrame>>;

    /// All frames for a user, newest first.
    async fn list_frames(&self, user_id: &str) -> Result<Vec<ContextFrame>>;

    /// Drop the oldest historical frames beyond `keep`.
    async fn prune_frames(&self, user_id: &str, keep: usize) -> Result<()>;

    // ---- temporal patterns and the access log ----

    /// Replace the user's pattern record.
    async fn put_pattern(&self, pattern: &TemporalPattern) -> Result<()>;

    /// Fetch the user's pattern record.
    async fn get_pattern(&self, user_id: &str) -> Result<Option<TemporalPattern>>;

    /// Append an access log entry.
    async fn append_access(&self, entry: &AccessLogEntry) -> Result<()>;

    /// Access log entries at or after `since`, oldest first.
    async fn list_access(&self, user_id: &str, since: DateTime<Utc>)
        -> Result<Vec<AccessLogEntry>>;

    /// Drop access log entries older than `before` (retention TTL).
    async fn prune_access(&self, user_id: &str, before: DateTime<Utc>) -> Result<()>;

    // ---- recall sessions ----

    /// Insert or replace a recall session.
    async fn put_session(&self, session: &RecallSession) -> Result<()>;

    /// Fetch a session by id.
    async fn get_session(&self, user_id: &str, id: Uuid) -> Result<Option<RecallSession>>;

    /// Remove a session.
    async fn delete_session(&self, user_id: &str, id: Uuid) -> Result<bool>;

    /// All sessions for a user, for TTL sweeps.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<RecallSession>>;

    // ---- notifications and audit ----

    /// Append a notification record. Records are never mutated.
    async fn append_notification(&self, record: &NotificationRecord) -> Result<()>;

    /// Notification records for one entity, newest first.
    async fn list_notifications(
        &self,
        user_id: &str,
        entity_id: Uuid,
    ) -> Result<Vec<NotificationRecord>>;

    /// Append an audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
}

/// Vector index projection: semantic candidate lookup.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the embedding for a memory.
    ///
    /// Idempotent; a write whose `logical_ts` is older than the stored one
    /// is stale and must be discarded.
    async fn upsert(
        &self,
        user_id: &str,
        memory_id: Uuid,
        embedding: Vec<f32>,
        logical_ts: i64,
    ) -> Result<()>;

    /// Top-`k` nearest stored vectors for this user.
    async fn query(&self, user_id: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>>;

    /// Fetch a stored embedding.
    async fn get(&self, user_id: &str, memory_id: Uuid) -> Result<Option<Vec<f32>>>;

    /// Remove an embedding. Returns whether one was present.
    async fn remove(&self, user_id: &str, memory_id: Uuid) -> Result<bool>;
}

/// Hot tier: in-memory KV with TTL, shared by all users. Keys are
/// user-prefixed; the engine never reads across users.
#[async_trait]
pub trait HotCache: Send + Sync {
    /// Insert a memory with a TTL. At capacity, the implementation evicts
    /// LRU-within-hot before inserting.
    async fn put(&self, key: &str, memory: &Memory, ttl: Duration) -> Result<()>;

    /// Fetch a live entry. Implementations refresh the sliding TTL.
    async fn get(&self, key: &str) -> Result<Option<Memory>>;

    /// Remove an entry. Returns whether one was present.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Keys of live entries, for the demotion sweep.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Number of live entries.
    async fn len(&self) -> Result<usize>;
}

/// Cold tier: opaque object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read an object.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove an object. Returns whether one was present.
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// Hot cache key for a memory, user-prefixed to keep namespaces disjoint.
#[must_use]
pub fn hot_key(user_id: &str, memory_id: Uuid) -> String {
    format!("{user_id}:{memory_id}")
}

/// Split a hot cache key back into `(user_id, memory_id)`.
#[must_use]
pub fn parse_hot_key(key: &str) -> Option<(String, Uuid)> {
    let (user_id, raw_id) = key.rsplit_once(':')?;
    let memory_id = Uuid::parse_str(raw_id).ok()?;
    Some((user_id.to_string(), memory_id))
}
