//! # Relevance Engine
//!
//! The facade owning every collaborator: stores, extractor, calculator,
//! tier manager, retrieval pipeline, frame store, trackers, sessions, and
//! the background maintenance workers. Constructed explicitly and passed
//! around; there is no global state. Tests construct one over in-memory
//! fakes with [`RelevanceEngine::in_memory`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::{RESTORE_GRACE_DAYS, WORKER_JITTER_FACTOR};
use crate::context::{ContextFrameStore, FrameFields};
use crate::embeddings::{EmbeddingProvider, HashedBagEmbedder};
use crate::entities::EntityResolver;
use crate::error::{Error, Result};
use crate::export::Exporter;
use crate::extraction::{FeatureExtractor, LanguageBackend};
use crate::ingest::{IngestHints, IngestOrchestrator, IngestReceipt, SideEffect, SideEffectDispatcher};
use crate::loops::OpenLoopTracker;
use crate::notify::CarePressureChecker;
use crate::relationships::RelationshipUpdater;
use crate::retrieval::{
    QueryCache, QueryKey, RecallFilters, RetrievalOutcome, RetrievalPipeline, RetrievalRequest,
    RetrievedMemory,
};
use crate::salience::SalienceCalculator;
use crate::session::{RecallSessionManager, VoteOutcome};
use crate::storage::memory::{
    InMemoryDocumentStore, InMemoryHotCache, InMemoryObjectStore, InMemoryVectorIndex,
};
use crate::storage::{DocumentStore, HotCache, ObjectStore, VectorIndex};
use crate::temporal::{AnticipateDecision, PatternDetector, Prefetcher};
use crate::tier::TierManager;
use crate::types::{
    ContextFrame, Entity, EntityKind, LifecycleState, LoopKind, LoopState, Memory, OpenLoop,
    RecallSession, Relationship, TemporalPattern, Vote,
};

/// External collaborators handed to the engine.
pub struct EngineDeps {
    /// Document store, the source of truth.
    pub document: Arc<dyn DocumentStore>,
    /// Vector index projection.
    pub vector: Arc<dyn VectorIndex>,
    /// Hot tier cache.
    pub hot: Arc<dyn HotCache>,
    /// Cold tier object store.
    pub cold: Arc<dyn ObjectStore>,
    /// Embedding model.
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// LLM feature backend, if deployed.
    pub language: Option<Arc<dyn LanguageBackend>>,
}

/// How `forget` transitions a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetMode {
    /// Hidden from retrieval unless the owner asks explicitly.
    Suppress,
    /// Kept but out of ranking surfaces.
    Archive,
    /// Tombstoned; restorable only within the grace window.
    Delete,
}

/// Filters for `list_loops`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopFilter {
    /// Restrict to one state.
    pub state: Option<LoopState>,
    /// Restrict to one counterparty entity.
    pub counterparty: Option<Uuid>,
}

/// Result of `whats_relevant`.
#[derive(Debug, Clone)]
pub struct RelevantSummary {
    /// Ranked memories for the current context.
    pub items: Vec<RetrievedMemory>,
    /// The user's open loops.
    pub loops: Vec<OpenLoop>,
    /// The active frame, if one exists.
    pub context: Option<ContextFrame>,
    /// One-line description of the active context.
    pub summary: String,
}

/// Result of `get_briefing`.
#[derive(Debug, Clone)]
pub struct Briefing {
    /// The person.
    pub person: Entity,
    /// The first-person relationship edge, when one exists.
    pub relationship: Option<Relationship>,
    /// Open loops the user owes this person.
    pub you_owe: Vec<OpenLoop>,
    /// Open loops this person owes the user.
    pub they_owe: Vec<OpenLoop>,
    /// Open loops with future due dates, soonest first.
    pub upcoming: Vec<OpenLoop>,
    /// Topics to avoid.
    pub sensitivities: Vec<String>,
}

/// Handles for the background workers; dropping does not stop them,
/// [`RelevanceEngine::shutdown`] does.
pub struct WorkerHandles {
    handles: Vec<JoinHandle<()>>,
}

/// The engine.
pub struct RelevanceEngine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    tier: Arc<TierManager>,
    pipeline: Arc<RetrievalPipeline>,
    frames: ContextFrameStore,
    loops: Arc<OpenLoopTracker>,
    sessions: RecallSessionManager,
    exporter: Exporter,
    detector: PatternDetector,
    prefetcher: Prefetcher,
    care: CarePressureChecker,
    ingestor: IngestOrchestrator,
    dispatcher: Arc<SideEffectDispatcher>,
    query_cache: Arc<QueryCache>,
    healthy: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl RelevanceEngine {
    /// Wire an engine over the given collaborators.
    #[must_use]
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Arc<Self> {
        let EngineDeps {
            document,
            vector,
            hot,
            cold,
            embedder,
            language,
        } = deps;

        let healthy = Arc::new(AtomicBool::new(true));
        let query_cache = Arc::new(QueryCache::new());
        let tier = Arc::new(TierManager::new(
            &config,
            document.clone(),
            hot,
            cold,
        ));
        let pipeline = Arc::new(RetrievalPipeline::new(
            &config,
            document.clone(),
            vector.clone(),
            embedder.clone(),
        ));
        let loops = Arc::new(OpenLoopTracker::new(
            document.clone(),
            EntityResolver::new(document.clone()),
        ));
        let relationships = Arc::new(RelationshipUpdater::new(
            document.clone(),
            EntityResolver::new(document.clone()),
        ));
        let extractor = Arc::new(FeatureExtractor::new(&config, language));
        let dispatcher = SideEffectDispatcher::spawn(
            document.clone(),
            vector.clone(),
            embedder.clone(),
            loops.clone(),
            relationships,
            tier.clone(),
        );
        let ingestor = IngestOrchestrator::new(
            config.clone(),
            document.clone(),
            extractor,
            SalienceCalculator::with_version(config.salience_weights_version.clone()),
            EntityResolver::new(document.clone()),
            dispatcher.clone(),
            query_cache.clone(),
            healthy.clone(),
        );
        let sessions = RecallSessionManager::new(
            document.clone(),
            vector.clone(),
            embedder.clone(),
            pipeline.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            frames: ContextFrameStore::new(
                document.clone(),
                EntityResolver::new(document.clone()),
            ),
            exporter: Exporter::new(document.clone()),
            detector: PatternDetector::new(&config, document.clone()),
            prefetcher: Prefetcher::new(document.clone(), tier.clone()),
            care: CarePressureChecker::new(
                document.clone(),
                EntityResolver::new(document.clone()),
                config.notification_cooldown_seconds,
            ),
            store: document,
            index: vector,
            tier,
            pipeline,
            loops,
            sessions,
            ingestor,
            dispatcher,
            query_cache,
            healthy,
            shutdown,
            config,
        })
    }

    /// Engine over in-process stores, for tests and single-node use.
    #[must_use]
    pub fn in_memory(config: EngineConfig) -> Arc<Self> {
        Self::new(
            config,
            EngineDeps {
                document: Arc::new(InMemoryDocumentStore::new()),
                vector: Arc::new(InMemoryVectorIndex::new()),
                hot: Arc::new(InMemoryHotCache::new()),
                cold: Arc::new(InMemoryObjectStore::new()),
                embedder: Arc::new(HashedBagEmbedder::new()),
                language: None,
            },
        )
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wait until all dispatched side effects have settled. Test hook.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    // ------------------------------------------------------------------
    // Tool surface
    // ------------------------------------------------------------------

    /// Ingest a memory.
    pub async fn store_memory(
        &self,
        user_id: &str,
        device_id: &str,
        text: &str,
        hints: IngestHints,
    ) -> Result<IngestReceipt> {
        let now = Utc::now();
        let hints = self.hints_with_active_frame(user_id, hints, now).await?;
        self.ingestor.ingest(user_id, device_id, text, hints, now).await
    }

    /// Ingest at an explicit timestamp. Exposed for deterministic tests
    /// and for import tooling; production callers use [`store_memory`].
    pub async fn store_memory_at(
        &self,
        user_id: &str,
        device_id: &str,
        text: &str,
        hints: IngestHints,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt> {
        let hints = self.hints_with_active_frame(user_id, hints, now).await?;
        self.ingestor.ingest(user_id, device_id, text, hints, now).await
    }

    async fn hints_with_active_frame(
        &self,
        user_id: &str,
        mut hints: IngestHints,
        now: DateTime<Utc>,
    ) -> Result<IngestHints> {
        if hints.context.is_none() {
            if let Some(frame) = self.frames.active_frame(user_id, now).await? {
                hints.context = Some(crate::types::ContextSnapshot {
                    location: frame.location.clone(),
                    people: Vec::new(),
                    activity: frame.activity.clone(),
                    project: frame.project.clone(),
                    tags: frame.tags.clone(),
                });
            }
        }
        Ok(hints)
    }

    /// Ranked recall.
    pub async fn recall(
        &self,
        user_id: &str,
        query: Option<&str>,
        filters: RecallFilters,
        limit: usize,
        include_suppressed: bool,
    ) -> Result<RetrievalOutcome> {
        if user_id.is_empty() {
            return Err(Error::Validation("user_id is required".into()));
        }
        let now = Utc::now();
        let limit = limit.max(1);
        let frame = self.frames.active_frame(user_id, now).await?;
        let context_key = frame
            .as_ref()
            .map_or_else(|| "global".to_string(), ContextFrame::context_key);
        let adjustments = self.sessions.adjustments_for(user_id, &context_key);

        let cache_key = QueryKey::new(
            user_id,
            query.unwrap_or(""),
            limit,
            include_suppressed,
            &filters.tags,
        );
        if filters.category.is_none() {
            if let Some(ranked) = self.query_cache.get(&cache_key) {
                debug!(user_id, "recall served from query cache");
                let items = self.rehydrate(user_id, &ranked, include_suppressed).await?;
                self.note_reads(user_id, &items, now);
                return Ok(RetrievalOutcome {
                    items,
                    degraded: false,
                    degraded_reason: None,
                });
            }
        }

        let request = RetrievalRequest {
            user_id: user_id.to_string(),
            query: query.map(str::to_string),
            limit,
            include_suppressed,
            filters: filters.clone(),
        };
        let outcome = self
            .pipeline
            .retrieve(&request, frame.as_ref(), &adjustments, now)
            .await?;

        if filters.category.is_none() {
            self.query_cache.put(
                cache_key,
                outcome.items.iter().map(|i| (i.memory.id, i.score)).collect(),
            );
        }
        self.note_reads(user_id, &outcome.items, now);
        Ok(outcome)
    }

    async fn rehydrate(
        &self,
        user_id: &str,
        ranked: &[(Uuid, f32)],
        include_suppressed: bool,
    ) -> Result<Vec<RetrievedMemory>> {
        let mut items = Vec::new();
        for (memory_id, score) in ranked {
            let Some(memory) = self.store.get_memory(user_id, *memory_id).await? else {
                continue;
            };
            if !memory.is_readable(include_suppressed) {
                continue;
            }
            items.push(RetrievedMemory {
                memory,
                score: *score,
                semantic_similarity: 0.0,
                gate: None,
            });
        }
        Ok(items)
    }

    /// Record read accesses for returned items: the frequency tracker for
    /// promotion and the access log for pattern learning.
    fn note_reads(&self, user_id: &str, items: &[RetrievedMemory], now: DateTime<Utc>) {
        for item in items {
            self.dispatcher.dispatch(SideEffect::LogAccess {
                user_id: user_id.to_string(),
                memory_id: item.memory.id,
                at: now,
            });
        }
        // Access-count bookkeeping and threshold promotion run on the
        // tier path; loading by id is cheap and idempotent.
        let tier = self.tier.clone();
        let user = user_id.to_string();
        let ids: Vec<Uuid> = items.iter().map(|i| i.memory.id).collect();
        tokio::spawn(async move {
            for id in ids {
                if let Err(error) = tier.load(&user, id, now).await {
                    warn!(%error, "read bookkeeping failed");
                }
            }
        });
    }

    /// What matters now: context-gated ranking plus open loops.
    pub async fn whats_relevant(&self, user_id: &str) -> Result<RelevantSummary> {
        let now = Utc::now();
        let frame = self.frames.active_frame(user_id, now).await?;
        let query = frame.as_ref().map(ContextFrame::synthesized_query);

        let outcome = self
            .recall(
                user_id,
                query.as_deref().filter(|q| !q.is_empty()),
                RecallFilters::default(),
                10,
                false,
            )
            .await?;

        let loops = self
            .list_loops(user_id, LoopFilter {
                state: Some(LoopState::Open),
                counterparty: None,
            })
            .await?;

        let summary = frame.as_ref().map_or_else(
            || "no active context".to_string(),
            |f| {
                let mut parts = Vec::new();
                if let Some(location) = &f.location {
                    parts.push(format!("at {location}"));
                }
                if let Some(activity) = &f.activity {
                    parts.push(activity.clone());
                }
                if let Some(project) = &f.project {
                    parts.push(format!("on {project}"));
                }
                if parts.is_empty() {
                    "active context".to_string()
                } else {
                    parts.join(", ")
                }
            },
        );

        Ok(RelevantSummary {
            items: outcome.items,
            loops,
            context: frame,
            summary,
        })
    }

    /// Briefing ahead of an interaction with a person.
    pub async fn get_briefing(&self, user_id: &str, person_id: Uuid) -> Result<Briefing> {
        let now = Utc::now();
        let person = self
            .store
            .get_entity(user_id, person_id)
            .await?
            .ok_or(Error::NotFound(person_id))?;
        if person.kind != EntityKind::Person {
            return Err(Error::Semantic("briefings are for persons".into()));
        }

        let resolver = EntityResolver::new(self.store.clone());
        let self_entity = resolver.self_entity(user_id, now).await?;
        let relationship = self
            .store
            .get_relationship(user_id, self_entity.id, person_id)
            .await?;

        let all_loops = self.store.list_loops(user_id).await?;
        let open_with_person = |kind: LoopKind| -> Vec<OpenLoop> {
            all_loops
                .iter()
                .filter(|l| {
                    l.state == LoopState::Open && l.counterparty_id == person_id && l.kind == kind
                })
                .cloned()
                .collect()
        };
        let you_owe = open_with_person(LoopKind::YouOweThem);
        let they_owe = open_with_person(LoopKind::TheyOweYou);

        let mut upcoming: Vec<OpenLoop> = all_loops
            .iter()
            .filter(|l| {
                l.state == LoopState::Open
                    && l.counterparty_id == person_id
                    && l.due_at.is_some_and(|due| due > now)
            })
            .cloned()
            .collect();
        upcoming.sort_by_key(|l| l.due_at);

        let sensitivities = relationship
            .as_ref()
            .map(|r| r.sensitivities.clone())
            .unwrap_or_default();

        Ok(Briefing {
            person,
            relationship,
            you_owe,
            they_owe,
            upcoming,
            sensitivities,
        })
    }

    /// Start a context frame.
    pub async fn set_context(&self, user_id: &str, fields: FrameFields) -> Result<ContextFrame> {
        self.frames.set_context(user_id, fields, Utc::now()).await
    }

    /// Close the active frame.
    pub async fn clear_context(&self, user_id: &str) -> Result<Option<Uuid>> {
        self.frames.clear_context(user_id).await
    }

    /// List loops under a filter.
    pub async fn list_loops(&self, user_id: &str, filter: LoopFilter) -> Result<Vec<OpenLoop>> {
        let mut loops = self.store.list_loops(user_id).await?;
        if let Some(state) = filter.state {
            loops.retain(|l| l.state == state);
        }
        if let Some(counterparty) = filter.counterparty {
            loops.retain(|l| l.counterparty_id == counterparty);
        }
        loops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(loops)
    }

    /// Close a loop as done.
    pub async fn close_loop(&self, user_id: &str, loop_id: Uuid) -> Result<OpenLoop> {
        self.loops.close(user_id, loop_id, LoopState::Done, Utc::now()).await
    }

    /// Cancel a loop.
    pub async fn cancel_loop(&self, user_id: &str, loop_id: Uuid) -> Result<OpenLoop> {
        self.loops
            .close(user_id, loop_id, LoopState::Cancelled, Utc::now())
            .await
    }

    /// Transition a memory out of the active state.
    pub async fn forget(&self, user_id: &str, memory_id: Uuid, mode: ForgetMode) -> Result<()> {
        let now = Utc::now();
        let mut memory = self
            .store
            .get_memory(user_id, memory_id)
            .await?
            .ok_or(Error::NotFound(memory_id))?;
        if memory.state == LifecycleState::Deleted {
            return Err(Error::Semantic("memory is already deleted".into()));
        }

        let action = match mode {
            ForgetMode::Suppress => {
                memory.state = LifecycleState::Suppressed;
                "suppress"
            }
            ForgetMode::Archive => {
                memory.state = LifecycleState::Archived;
                "archive"
            }
            ForgetMode::Delete => {
                memory.state = LifecycleState::Deleted;
                memory.deleted_at = Some(now);
                "delete"
            }
        };
        self.store.put_memory(&memory).await?;
        self.tier.evict(user_id, memory_id).await?;
        if mode == ForgetMode::Delete {
            self.index.remove(user_id, memory_id).await?;
        }
        self.audit(user_id, memory_id, action, "", now).await?;
        self.query_cache.invalidate_user(user_id);
        info!(user_id, %memory_id, action, "memory state transitioned");
        Ok(())
    }

    /// Return a memory to the active state. Deleted memories restore only
    /// within the grace window.
    pub async fn restore(&self, user_id: &str, memory_id: Uuid) -> Result<Memory> {
        let now = Utc::now();
        let mut memory = self
            .store
            .get_memory(user_id, memory_id)
            .await?
            .ok_or(Error::NotFound(memory_id))?;

        if memory.state == LifecycleState::Deleted {
            let grace = ChronoDuration::days(RESTORE_GRACE_DAYS);
            let within = memory
                .deleted_at
                .is_some_and(|deleted_at| now - deleted_at <= grace);
            if !within {
                return Err(Error::Semantic(format!(
                    "restore window of {RESTORE_GRACE_DAYS} days has passed"
                )));
            }
            // The deletion dropped the embedding projection; rebuild it.
            self.dispatcher.dispatch(SideEffect::UpsertEmbedding {
                memory: Box::new(Memory {
                    state: LifecycleState::Active,
                    deleted_at: None,
                    ..memory.clone()
                }),
            });
        }

        memory.state = LifecycleState::Active;
        memory.deleted_at = None;
        self.store.put_memory(&memory).await?;
        self.audit(user_id, memory_id, "restore", "", now).await?;
        self.query_cache.invalidate_user(user_id);
        Ok(memory)
    }

    /// Mutate a memory's associated entity set.
    pub async fn reassociate(
        &self,
        user_id: &str,
        memory_id: Uuid,
        add: &[Uuid],
        remove: &[Uuid],
    ) -> Result<Memory> {
        let now = Utc::now();
        let mut memory = self
            .store
            .get_memory(user_id, memory_id)
            .await?
            .ok_or(Error::NotFound(memory_id))?;

        for entity_id in add {
            if self.store.get_entity(user_id, *entity_id).await?.is_none() {
                return Err(Error::Validation(format!("unknown entity {entity_id}")));
            }
            if !memory.entity_ids.contains(entity_id) {
                memory.entity_ids.push(*entity_id);
            }
        }
        memory.entity_ids.retain(|id| !remove.contains(id));
        self.store.put_memory(&memory).await?;
        self.audit(
            user_id,
            memory_id,
            "reassociate",
            &format!("+{} -{}", add.len(), remove.len()),
            now,
        )
        .await?;
        Ok(memory)
    }

    /// Export canonical records as NDJSON.
    pub async fn export_memories(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<String> {
        self.exporter.export(user_id, since).await
    }

    /// Open a recall session.
    pub async fn recall_session_start(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<(RecallSession, Vec<RetrievedMemory>)> {
        self.sessions.start(user_id, query, limit.max(1), Utc::now()).await
    }

    /// Apply a vote round.
    pub async fn recall_vote(
        &self,
        user_id: &str,
        session_id: Uuid,
        votes: HashMap<Uuid, Vote>,
        limit: usize,
    ) -> Result<VoteOutcome> {
        self.sessions
            .vote(user_id, session_id, votes, limit.max(1), Utc::now())
            .await
    }

    /// Resolve a session, scoping its adjustments to the active context.
    pub async fn recall_resolve(&self, user_id: &str, session_id: Uuid) -> Result<RecallSession> {
        let now = Utc::now();
        let context_key = self
            .frames
            .active_frame(user_id, now)
            .await?
            .map_or_else(|| "global".to_string(), |f| f.context_key());
        self.sessions
            .resolve(user_id, session_id, &context_key, now)
            .await
    }

    /// Event-triggered anticipatory prefetch.
    pub async fn anticipate(
        &self,
        user_id: &str,
        look_ahead_minutes: i64,
    ) -> Result<AnticipateDecision> {
        self.prefetcher
            .anticipate(user_id, ChronoDuration::minutes(look_ahead_minutes), Utc::now())
            .await
    }

    /// Current pattern summary, computing one when none is stored yet.
    pub async fn get_predictions(&self, user_id: &str) -> Result<TemporalPattern> {
        let now = Utc::now();
        match self.store.get_pattern(user_id).await? {
            Some(pattern) => Ok(pattern),
            None => self.detector.recompute(user_id, now).await,
        }
    }

    async fn audit(
        &self,
        user_id: &str,
        memory_id: Uuid,
        action: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .append_audit(&crate::types::AuditEntry {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                memory_id,
                action: action.to_string(),
                detail: detail.to_string(),
                at: now,
            })
            .await
    }

    // ------------------------------------------------------------------
    // Background workers
    // ------------------------------------------------------------------

    /// Spawn the maintenance workers: a fast demotion sweep and a slow
    /// pass for loop expiry, session expiry, pattern recompute, scheduled
    /// prefetch, and care-circle pressure. Cadences carry jitter so
    /// engines started together do not sweep in lockstep.
    pub fn start_workers(self: &Arc<Self>) -> WorkerHandles {
        let mut handles = Vec::new();

        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(jittered_period(60.0));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(error) = engine.tier.demote_sweep(Utc::now()).await {
                            warn!(%error, "demotion sweep failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));

        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(jittered_period(300.0));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => engine.maintenance_pass().await,
                    _ = shutdown.changed() => break,
                }
            }
        }));

        WorkerHandles { handles }
    }

    /// One maintenance pass over every user. Public so tests and the
    /// adapter can run it deterministically.
    pub async fn maintenance_pass(&self) {
        let now = Utc::now();
        let users = match self.store.list_user_ids().await {
            Ok(users) => users,
            Err(error) => {
                warn!(%error, "maintenance pass could not enumerate users");
                return;
            }
        };
        for user_id in users {
            if let Err(error) = self
                .loops
                .sweep_expired(&user_id, self.config.loop_grace_days, now)
                .await
            {
                warn!(user_id, %error, "loop expiry sweep failed");
            }
            if let Err(error) = self.sessions.expire_sweep(&user_id, now).await {
                warn!(user_id, %error, "session expiry sweep failed");
            }
            if let Err(error) = self.detector.recompute(&user_id, now).await {
                warn!(user_id, %error, "pattern recompute failed");
            }
            if let Err(error) = self.detector.prune_log(&user_id, now).await {
                warn!(user_id, %error, "access log prune failed");
            }
            if let Err(error) = self
                .prefetcher
                .anticipate(&user_id, ChronoDuration::minutes(10), now)
                .await
            {
                warn!(user_id, %error, "scheduled prefetch failed");
            }
            if let Err(error) = self.care.check(&user_id, now).await {
                warn!(user_id, %error, "care pressure check failed");
            }
        }
    }

    /// Signal workers to stop and wait for them.
    pub async fn shutdown(&self, workers: WorkerHandles) {
        let _ = self.shutdown.send(true);
        for handle in workers.handles {
            let _ = handle.await;
        }
    }

    /// Whether writes are currently accepted.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Worker cadence with jitter applied around the base period.
fn jittered_period(base_secs: f64) -> std::time::Duration {
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * (base_secs * WORKER_JITTER_FACTOR);
    std::time::Duration::from_secs_f64((base_secs + jitter).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_period_stays_within_bounds() {
        for _ in 0..50 {
            let period = jittered_period(60.0).as_secs_f64();
            assert!((54.0..=66.0).contains(&period), "period {period}s outside bounds");
        }
    }
}
