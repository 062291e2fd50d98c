//! Core data model for the relevance engine.
//!
//! Canonical records stored in the document store: memories, entities,
//! relationships, open loops, context frames, temporal patterns, recall
//! sessions, access log entries, and notification records. The document
//! store is the sole authority for these; the vector index and hot cache
//! are projections and may be rebuilt from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::SCHEMA_VERSION;

// ============================================================================
// Memory
// ============================================================================

/// Storage tier of a memory, naming its access latency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// In-memory KV with TTL, sub-millisecond reads.
    Hot,
    /// Document store, low-millisecond reads.
    Warm,
    /// Object storage, tens of milliseconds or more.
    Cold,
}

/// Lifecycle state of a memory.
///
/// A memory in `Deleted` state is never returned by any read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Normal, retrievable state.
    Active,
    /// Kept but excluded from ranking surfaces.
    Archived,
    /// Hidden from retrieval unless the owner explicitly asks.
    Suppressed,
    /// Tombstoned; restorable only within the grace window.
    Deleted,
}

/// High-level category assigned by feature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// A choice that was made.
    Decision,
    /// A promise owed by or to the user.
    Commitment,
    /// A plain statement of fact.
    #[default]
    Observation,
    /// An open question.
    Question,
    /// Anything else.
    Other,
}

/// A person mention found in memory text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonMention {
    /// Surface form as written ("Sarah", "@mike").
    pub surface: String,
    /// Canonical entity id, when resolvable against the entity store.
    pub entity_id: Option<Uuid>,
}

/// Who owes whom in a proposed commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentPolarity {
    /// The user owes the counterparty.
    YouOwe,
    /// The counterparty owes the user.
    TheyOwe,
    /// A shared obligation.
    Mutual,
}

/// A commitment proposed by feature extraction, before it is resolved
/// into an [`OpenLoop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedCommitment {
    /// Direction of the obligation.
    pub polarity: CommitmentPolarity,
    /// Counterparty surface form.
    pub counterparty: String,
    /// What is owed.
    pub description: String,
    /// Parsed due date, if the text carried one.
    pub due_at: Option<DateTime<Utc>>,
}

/// Features extracted from memory text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Features {
    /// Person mentions with surface forms and canonical ids.
    pub people: Vec<PersonMention>,
    /// Topic keywords.
    pub topics: Vec<String>,
    /// Location mentions.
    pub locations: Vec<String>,
    /// Assigned category.
    pub category: MemoryCategory,
    /// Emotional valence in [-1, 1].
    pub valence: f32,
    /// Emotional arousal in [-1, 1].
    pub arousal: f32,
    /// Commitments proposed by the extractor.
    pub commitments: Vec<ProposedCommitment>,
    /// Tokens not previously seen in this user's vocabulary.
    pub novelty_tokens: Vec<String>,
    /// Topics flagged as sensitive for mentioned relationships.
    pub sensitive_topics: Vec<String>,
    /// True when the language backend was unavailable and extraction fell
    /// back to lexical-only mode.
    pub degraded: bool,
}

/// Salience scoring result attached to a memory.
///
/// `creation_score` is immutable once recorded; offline re-scoring may
/// update `current_score` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalienceScore {
    /// Score at ingest time, in [0, 100]. Never changes.
    pub creation_score: f32,
    /// Present score, in [0, 100]. May be re-scored offline.
    pub current_score: f32,
    /// Version tag of the weights that produced `creation_score`.
    pub weights_version: String,
}

/// Caller-supplied snapshot of the situation a memory originated in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextSnapshot {
    /// Where the user was.
    pub location: Option<String>,
    /// Who was present (surface names).
    pub people: Vec<String>,
    /// What the user was doing.
    pub activity: Option<String>,
    /// Project in focus.
    pub project: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

/// The canonical memory record.
///
/// Text is immutable once stored; the fingerprint is unique per user
/// within the dedup window; every active memory carries exactly one
/// embedding reference once its embedding side effect has landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Stable id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Original text, immutable.
    pub text: String,
    /// Stable hash of the normalized text, for dedup.
    pub fingerprint: String,
    /// Creation timestamp; also the logical timestamp for projections.
    pub created_at: DateTime<Utc>,
    /// Last read access.
    pub last_accessed_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// When the memory entered `Deleted` state, for the restore grace window.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Current storage tier.
    pub tier: Tier,
    /// Lifetime access count.
    pub access_count: u64,
    /// Extracted features.
    pub features: Features,
    /// Salience scores.
    pub salience: SalienceScore,
    /// Associated entity ids (people, projects).
    pub entity_ids: Vec<Uuid>,
    /// Reference into the vector index, once embedded.
    pub embedding_ref: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Optional hints for the prefetcher.
    pub predictive_hints: Option<Vec<String>>,
    /// Situation snapshot at ingest time.
    pub origin_context: Option<ContextSnapshot>,
    /// Record schema version.
    pub schema_version: u16,
}

impl Memory {
    /// Construct a new active, warm-tier memory.
    #[must_use]
    pub fn new(user_id: String, text: String, fingerprint: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            text,
            fingerprint,
            created_at: now,
            last_accessed_at: now,
            state: LifecycleState::Active,
            deleted_at: None,
            tier: Tier::Warm,
            access_count: 0,
            features: Features::default(),
            salience: SalienceScore {
                creation_score: 0.0,
                current_score: 0.0,
                weights_version: String::new(),
            },
            entity_ids: Vec::new(),
            embedding_ref: None,
            tags: Vec::new(),
            predictive_hints: None,
            origin_context: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Logical timestamp used to discard stale projection writes.
    #[must_use]
    pub fn logical_ts(&self) -> i64 {
        self.created_at.timestamp_micros()
    }

    /// True when any read path may return this memory.
    #[must_use]
    pub fn is_readable(&self, include_suppressed: bool) -> bool {
        match self.state {
            LifecycleState::Active => true,
            LifecycleState::Suppressed => include_suppressed,
            LifecycleState::Archived | LifecycleState::Deleted => false,
        }
    }
}

// ============================================================================
// Entities and relationships
// ============================================================================

/// Kind of referent an entity names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Project,
    Place,
    Topic,
}

/// Notification preferences for a care-circle member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotifyPrefs {
    /// Delivery channels, interpreted by the external delivery layer.
    pub channels: Vec<String>,
    /// Valence threshold below which pressure checks fire.
    pub valence_floor: f32,
}

/// A referent: person, project, place, or topic.
///
/// Created on first mention; never deleted when the last mention is
/// removed, for continuity of relationship history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Referent kind.
    pub kind: EntityKind,
    /// Display name.
    pub name: String,
    /// True for the user's own persona entity.
    pub is_self: bool,
    /// Person is in the user's care circle.
    pub care_circle: bool,
    /// Delivery preferences, when in the care circle.
    pub notify_prefs: Option<NotifyPrefs>,
    /// First mention.
    pub created_at: DateTime<Utc>,
    /// Most recent mention.
    pub last_mentioned_at: DateTime<Utc>,
}

impl Entity {
    /// Construct a new entity owned by `user_id`.
    #[must_use]
    pub fn new(user_id: String, kind: EntityKind, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            name,
            is_self: false,
            care_circle: false,
            notify_prefs: None,
            created_at: now,
            last_mentioned_at: now,
        }
    }
}

/// Sentiment trajectory over the recent interaction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipTrend {
    Improving,
    #[default]
    Stable,
    Declining,
}

/// Directed edge between two entities.
///
/// Updated exclusively by the ingest pipeline; never hand-mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Owning user.
    pub user_id: String,
    /// Source entity (the user's persona for first-person edges).
    pub source_id: Uuid,
    /// Target entity.
    pub target_id: Uuid,
    /// Number of memories touching this edge.
    pub interaction_count: u64,
    /// Timestamp of the most recent interaction.
    pub last_interaction_at: DateTime<Utc>,
    /// Exponential moving average of memory valence.
    pub valence_mean: f32,
    /// Recent raw valence samples, bounded to the trend window.
    pub recent_valence: Vec<f32>,
    /// Sentiment trajectory recomputed from `recent_valence`.
    pub trend: RelationshipTrend,
    /// Topics to avoid with this counterparty. Additive.
    pub sensitivities: Vec<String>,
}

// ============================================================================
// Open loops
// ============================================================================

/// Direction of an open commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    /// The user owes the counterparty.
    YouOweThem,
    /// The counterparty owes the user.
    TheyOweYou,
    /// Shared obligation.
    Mutual,
}

impl From<CommitmentPolarity> for LoopKind {
    fn from(polarity: CommitmentPolarity) -> Self {
        match polarity {
            CommitmentPolarity::YouOwe => LoopKind::YouOweThem,
            CommitmentPolarity::TheyOwe => LoopKind::TheyOweYou,
            CommitmentPolarity::Mutual => LoopKind::Mutual,
        }
    }
}

/// State of an open loop.
///
/// Transitions form `Open -> {Done, Expired, Cancelled}` only; once
/// terminal, only audit fields change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Open,
    Done,
    Expired,
    Cancelled,
}

impl LoopState {
    /// True when no further state transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoopState::Open)
    }
}

/// An unresolved commitment either owed by or owed to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLoop {
    /// Stable id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Obligation direction.
    pub kind: LoopKind,
    /// Counterparty entity.
    pub counterparty_id: Uuid,
    /// What is owed.
    pub description: String,
    /// Stable hash of the normalized description, for duplicate suppression.
    pub description_fingerprint: String,
    /// Memory the loop originated from.
    pub memory_id: Uuid,
    /// Optional due date.
    pub due_at: Option<DateTime<Utc>>,
    /// Current state.
    pub state: LoopState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last state or audit change.
    pub updated_at: DateTime<Utc>,
    /// Most recent mention in any memory.
    pub last_mentioned_at: DateTime<Utc>,
}

// ============================================================================
// Context frames
// ============================================================================

/// Per-user rolling record of the current situation.
///
/// At most one active frame exists per user at any instant; prior frames
/// are kept as bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFrame {
    /// Stable id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Where the user is.
    pub location: Option<String>,
    /// Entities present.
    pub people: Vec<Uuid>,
    /// What the user is doing.
    pub activity: Option<String>,
    /// Project in focus.
    pub project: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Frame start.
    pub started_at: DateTime<Utc>,
    /// Sliding expiry.
    pub expires_at: DateTime<Utc>,
    /// True for the user's single active frame.
    pub active: bool,
}

impl ContextFrame {
    /// Key used to scope recall-session adjustments to a context.
    #[must_use]
    pub fn context_key(&self) -> String {
        self.project
            .clone()
            .or_else(|| self.location.clone())
            .unwrap_or_else(|| "global".to_string())
    }

    /// Text synthesized from the frame fields for embedding and derived
    /// queries.
    #[must_use]
    pub fn synthesized_query(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(location) = &self.location {
            parts.push(location.clone());
        }
        if let Some(activity) = &self.activity {
            parts.push(activity.clone());
        }
        if let Some(project) = &self.project {
            parts.push(project.clone());
        }
        parts.extend(self.tags.iter().cloned());
        parts.join(" ")
    }
}

// ============================================================================
// Temporal patterns and the access log
// ============================================================================

/// One detected periodicity slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSlot {
    /// Period length in hours (24, 168, or 720).
    pub period_hours: u32,
    /// `acf[period]/acf[0]`, in [0, 1].
    pub confidence: f32,
    /// Top peak offsets within the period, strongest first.
    pub peak_offsets: Vec<u32>,
}

/// Per-user vector of detected periodicities.
///
/// Recomputed wholesale by the detector, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPattern {
    /// Owning user.
    pub user_id: String,
    /// Daily (24 h) slot, when qualifying.
    pub daily: Option<PeriodicSlot>,
    /// Weekly (168 h) slot, when qualifying.
    pub weekly: Option<PeriodicSlot>,
    /// Monthly (720 h) slot, when qualifying.
    pub monthly: Option<PeriodicSlot>,
    /// True once 21+ days of data back the pattern.
    pub initial: bool,
    /// True once 66+ days of data back the pattern.
    pub stable: bool,
    /// Days of access log the computation saw.
    pub observed_days: u32,
    /// When the detector last ran.
    pub computed_at: DateTime<Utc>,
}

/// One access log entry; binned hourly at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Owning user.
    pub user_id: String,
    /// Memory that was accessed, when attributable.
    pub memory_id: Option<Uuid>,
    /// Access time.
    pub at: DateTime<Utc>,
}

// ============================================================================
// Recall sessions
// ============================================================================

/// A vote on a recall candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    /// Exactly what I meant.
    Hot,
    /// Close.
    Warm,
    /// Not it.
    Cold,
    /// Actively wrong.
    Wrong,
    /// Not it, but it reminds me of something: open a lateral branch.
    Spark,
}

/// One round of an iterative recall session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallRound {
    /// Query embedding used for this round.
    pub query_embedding: Vec<f32>,
    /// Ranked candidate memory ids returned.
    pub candidates: Vec<Uuid>,
    /// Votes cast on this round's candidates.
    pub votes: HashMap<Uuid, Vote>,
}

/// Ephemeral multi-round retrieval interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallSession {
    /// Session id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Original query text.
    pub original_query: String,
    /// Completed rounds, oldest first.
    pub rounds: Vec<RecallRound>,
    /// True once explicitly resolved.
    pub resolved: bool,
    /// Session start.
    pub created_at: DateTime<Utc>,
    /// Expiry for unresolved sessions.
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Notifications and audit
// ============================================================================

/// Delivery status of a notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Written by the core, awaiting external delivery.
    Pending,
    /// Reported delivered by the external layer.
    Sent,
    /// Delivery failed.
    Failed,
}

/// Append-only record of a notification trigger. Written, not mutated;
/// each delivery attempt writes a fresh record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Stable id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Entity the notification concerns.
    pub entity_id: Uuid,
    /// Why the trigger fired.
    pub reason: String,
    /// Delivery status at write time.
    pub status: NotificationStatus,
    /// Trigger time.
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry for explicit mutations (forget, restore,
/// reassociate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Stable id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Memory the action touched.
    pub memory_id: Uuid,
    /// Action name.
    pub action: String,
    /// Free-form detail.
    pub detail: String,
    /// When the action happened.
    pub at: DateTime<Utc>,
}

// ============================================================================
// Export
// ============================================================================

/// Canonical export record, one per NDJSON line.
///
/// Field order is fixed by this struct; output is bit-exact across engine
/// versions for any same-input corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub features: Features,
    pub salience: SalienceScore,
    pub tier: Tier,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_ref: Option<String>,
    pub tags: Vec<String>,
    pub loops: Vec<Uuid>,
}
