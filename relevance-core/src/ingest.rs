//! # Ingest Orchestrator
//!
//! The write path. Normalize and fingerprint, dedup within the idempotency
//! window, extract features, score salience, persist to the document store
//! (the linearization point), then fan side effects out to the background
//! dispatcher. A failed document write aborts the operation with no
//! observable side effects; a failed side effect never fails the ingest.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::{
    HOT_SALIENCE_THRESHOLD, MAX_MEMORY_TEXT_LEN, MAX_TAGS, SIDE_EFFECT_JITTER_FACTOR,
    SIDE_EFFECT_RETRIES,
};
use crate::embeddings::EmbeddingProvider;
use crate::entities::EntityResolver;
use crate::error::{Error, Result};
use crate::extraction::{EntityHint, FeatureExtractor};
use crate::fingerprint::{fingerprint, normalize};
use crate::loops::OpenLoopTracker;
use crate::relationships::RelationshipUpdater;
use crate::retrieval::{memory_embedding_text, QueryCache};
use crate::salience::{AmbientSignals, SalienceCalculator};
use crate::storage::circuit_breaker::CircuitBreaker;
use crate::storage::{DocumentStore, VectorIndex};
use crate::tier::TierManager;
use crate::types::{
    AccessLogEntry, ContextSnapshot, EntityKind, Memory, ProposedCommitment,
};

/// Caller-supplied hints accompanying a `store_memory` call.
#[derive(Debug, Clone, Default)]
pub struct IngestHints {
    /// Situation snapshot; the active frame is used when absent.
    pub context: Option<ContextSnapshot>,
    /// Extra tags to attach.
    pub tags: Vec<String>,
    /// Force the memory into the hot tier regardless of salience.
    pub force_hot: bool,
    /// Hints for the prefetcher.
    pub predictive_hints: Option<Vec<String>>,
}

/// Result of an ingest.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    /// Id of the stored (or deduplicated) memory.
    pub memory_id: Uuid,
    /// Creation salience.
    pub salience: f32,
    /// True when the call hit the dedup window and no new memory was made.
    pub deduplicated: bool,
    /// True when feature extraction fell back to lexical mode.
    pub degraded: bool,
    /// Human-readable degradation reason, when degraded.
    pub degraded_reason: Option<String>,
    /// Commitments extracted from the text; the open-loop side effect
    /// materializes them.
    pub commitments: Vec<ProposedCommitment>,
}

/// Typed side-effect jobs dispatched after the linearization write.
///
/// Each job is keyed by memory id and processed with at-least-once
/// semantics; handlers are idempotent so redundant delivery is harmless.
pub enum SideEffect {
    /// Embed and upsert into the vector index.
    UpsertEmbedding {
        /// Memory snapshot at ingest time.
        memory: Box<Memory>,
    },
    /// Create/refresh open loops and detect completions.
    ApplyLoops {
        /// Memory snapshot at ingest time.
        memory: Box<Memory>,
    },
    /// Fold the memory into the relationship graph.
    UpdateRelationships {
        /// Memory snapshot at ingest time.
        memory: Box<Memory>,
    },
    /// Write to the hot cache (salient or forced).
    WriteHot {
        /// Memory snapshot at ingest time.
        memory: Box<Memory>,
    },
    /// Append to the temporal access log.
    LogAccess {
        /// Owning user.
        user_id: String,
        /// Accessed memory.
        memory_id: Uuid,
        /// Access time.
        at: DateTime<Utc>,
    },
}

/// Exponential backoff with jitter for side-effect retries. The jitter
/// keeps retries from concurrent ingests from hammering a recovering
/// dependency in lockstep.
fn retry_backoff(attempt: u32) -> std::time::Duration {
    let base = (50_u64 << attempt) as f64;
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * (base * SIDE_EFFECT_JITTER_FACTOR);
    std::time::Duration::from_millis((base + jitter).max(1.0) as u64)
}

impl SideEffect {
    fn describe(&self) -> &'static str {
        match self {
            SideEffect::UpsertEmbedding { .. } => "upsert_embedding",
            SideEffect::ApplyLoops { .. } => "apply_loops",
            SideEffect::UpdateRelationships { .. } => "update_relationships",
            SideEffect::WriteHot { .. } => "write_hot",
            SideEffect::LogAccess { .. } => "log_access",
        }
    }
}

/// Background dispatcher for side-effect jobs: a worker drains the queue,
/// retrying each job with backoff before giving up to the repair pass.
pub struct SideEffectDispatcher {
    sender: mpsc::UnboundedSender<SideEffect>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

struct DispatcherDeps {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    loops: Arc<OpenLoopTracker>,
    relationships: Arc<RelationshipUpdater>,
    tier: Arc<TierManager>,
}

impl SideEffectDispatcher {
    /// Spawn the dispatcher worker and return a handle for enqueueing.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        loops: Arc<OpenLoopTracker>,
        relationships: Arc<RelationshipUpdater>,
        tier: Arc<TierManager>,
    ) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<SideEffect>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let deps = DispatcherDeps {
            store,
            index,
            embedder,
            loops,
            relationships,
            tier,
        };
        let worker_in_flight = Arc::clone(&in_flight);
        let worker_idle = Arc::clone(&idle);
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let label = job.describe();
                let mut attempt = 0;
                loop {
                    match Self::process(&deps, &job).await {
                        Ok(()) => break,
                        Err(error) if attempt < SIDE_EFFECT_RETRIES && error.is_recoverable() => {
                            attempt += 1;
                            warn!(label, attempt, %error, "side effect failed, retrying");
                            tokio::time::sleep(retry_backoff(attempt)).await;
                        }
                        Err(error) => {
                            // Deferred to the background repair pass; the
                            // document store remains the source of truth.
                            warn!(label, %error, "side effect abandoned after retries");
                            break;
                        }
                    }
                }
                if worker_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_idle.notify_waiters();
                }
            }
        });

        Arc::new(Self {
            sender,
            in_flight,
            idle,
        })
    }

    /// Enqueue a job. Never blocks the caller.
    pub fn dispatch(&self, job: SideEffect) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            // Worker gone (shutdown); the job is dropped with the engine.
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait until every dispatched job has been processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn process(deps: &DispatcherDeps, job: &SideEffect) -> Result<()> {
        let now = Utc::now();
        match job {
            SideEffect::UpsertEmbedding { memory } => {
                let embedding = deps.embedder.embed(&memory_embedding_text(memory)).await?;
                deps.index
                    .upsert(&memory.user_id, memory.id, embedding, memory.logical_ts())
                    .await
            }
            SideEffect::ApplyLoops { memory } => {
                deps.loops.apply_commitments(memory, now).await?;
                deps.loops.apply_completions(memory, now).await?;
                Ok(())
            }
            SideEffect::UpdateRelationships { memory } => {
                let person_ids = deps.relationships.apply(memory, now).await?;
                if person_ids.is_empty() {
                    return Ok(());
                }
                // Attach resolved entities to the memory record.
                if let Some(mut stored) = deps.store.get_memory(&memory.user_id, memory.id).await? {
                    for id in person_ids {
                        if !stored.entity_ids.contains(&id) {
                            stored.entity_ids.push(id);
                        }
                    }
                    deps.store.put_memory(&stored).await?;
                }
                Ok(())
            }
            SideEffect::WriteHot { memory } => deps.tier.promote_default(memory, now).await,
            SideEffect::LogAccess {
                user_id,
                memory_id,
                at,
            } => {
                deps.store
                    .append_access(&AccessLogEntry {
                        user_id: user_id.clone(),
                        memory_id: Some(*memory_id),
                        at: *at,
                    })
                    .await
            }
        }
    }
}

/// The ingest orchestrator.
pub struct IngestOrchestrator {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    extractor: Arc<FeatureExtractor>,
    calculator: SalienceCalculator,
    resolver: EntityResolver,
    dispatcher: Arc<SideEffectDispatcher>,
    query_cache: Arc<QueryCache>,
    store_breaker: CircuitBreaker,
    healthy: Arc<AtomicBool>,
}

impl IngestOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        extractor: Arc<FeatureExtractor>,
        calculator: SalienceCalculator,
        resolver: EntityResolver,
        dispatcher: Arc<SideEffectDispatcher>,
        query_cache: Arc<QueryCache>,
        healthy: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            store,
            extractor,
            calculator,
            resolver,
            dispatcher,
            query_cache,
            store_breaker: CircuitBreaker::new(Default::default()),
            healthy,
        }
    }

    /// Ingest one memory for an authenticated caller.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn ingest(
        &self,
        user_id: &str,
        device_id: &str,
        text: &str,
        hints: IngestHints,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(Error::Unhealthy("writes refused".into()));
        }
        if user_id.is_empty() {
            return Err(Error::Validation("user_id is required".into()));
        }
        let _ = device_id;

        // Step 1: normalize and dedup.
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(Error::Validation("text is empty".into()));
        }
        if normalized.chars().count() > MAX_MEMORY_TEXT_LEN {
            return Err(Error::Validation(format!(
                "text exceeds {MAX_MEMORY_TEXT_LEN} chars"
            )));
        }
        if hints.tags.len() > MAX_TAGS {
            return Err(Error::Validation(format!("more than {MAX_TAGS} tags")));
        }

        let text_fingerprint = fingerprint(&normalized);
        if let Some(existing) = self
            .store
            .find_by_fingerprint(user_id, &text_fingerprint)
            .await?
        {
            let window = Duration::seconds(self.config.dedup_window_seconds as i64);
            if now - existing.created_at <= window {
                debug!(memory_id = %existing.id, "ingest deduplicated within window");
                return Ok(IngestReceipt {
                    memory_id: existing.id,
                    salience: existing.salience.creation_score,
                    deduplicated: true,
                    degraded: existing.features.degraded,
                    degraded_reason: None,
                    commitments: existing.features.commitments.clone(),
                });
            }
        }

        // Step 2: features.
        let prior_entities: Vec<EntityHint> = self
            .store
            .list_entities(user_id)
            .await?
            .into_iter()
            .filter(|entity| !entity.is_self)
            .map(|entity| EntityHint {
                name: entity.name,
                kind: entity.kind,
            })
            .collect();
        let vocabulary_size = self.extractor.vocabulary_size(user_id);
        let features = self
            .extractor
            .extract(user_id, &normalized, &prior_entities, now)
            .await;

        // Step 3: salience.
        let signals = self.ambient_signals(user_id, vocabulary_size).await?;
        let salience = self.calculator.score(&features, &normalized, &signals);

        // Step 4: the linearization write.
        let mut memory = Memory::new(
            user_id.to_string(),
            normalized.clone(),
            text_fingerprint,
            now,
        );
        memory.features = features;
        memory.salience = salience;
        memory.tags = hints.tags.clone();
        if let Some(context) = &hints.context {
            if let Some(project) = &context.project {
                if !memory.tags.contains(project) {
                    memory.tags.push(project.clone());
                }
            }
        }
        memory.origin_context = hints.context;
        memory.predictive_hints = hints.predictive_hints;
        memory.embedding_ref = Some(format!("vec:{}", memory.id));

        let write = self
            .store_breaker
            .call(|| async { self.store.put_memory(&memory).await })
            .await;
        if let Err(error) = write {
            if error.is_fatal() {
                self.healthy.store(false, Ordering::SeqCst);
            }
            return Err(error);
        }

        // Step 5: side effects, fire-and-forget with retry.
        let degraded = memory.features.degraded;
        let receipt = IngestReceipt {
            memory_id: memory.id,
            salience: memory.salience.creation_score,
            deduplicated: false,
            degraded,
            degraded_reason: degraded.then(|| "language backend unavailable, lexical extraction".to_string()),
            commitments: memory.features.commitments.clone(),
        };

        let boxed = Box::new(memory);
        self.dispatcher.dispatch(SideEffect::UpsertEmbedding {
            memory: boxed.clone(),
        });
        self.dispatcher.dispatch(SideEffect::ApplyLoops {
            memory: boxed.clone(),
        });
        self.dispatcher.dispatch(SideEffect::UpdateRelationships {
            memory: boxed.clone(),
        });
        if hints.force_hot || receipt.salience >= HOT_SALIENCE_THRESHOLD {
            self.dispatcher.dispatch(SideEffect::WriteHot {
                memory: boxed.clone(),
            });
        }
        self.dispatcher.dispatch(SideEffect::LogAccess {
            user_id: user_id.to_string(),
            memory_id: receipt.memory_id,
            at: now,
        });

        self.query_cache.invalidate_user(user_id);
        info!(memory_id = %receipt.memory_id, salience = receipt.salience, "memory ingested");
        Ok(receipt)
    }

    /// Ambient salience signals: interests from frequent tags, close
    /// contacts from the care circle and frequently-interacted persons.
    async fn ambient_signals(&self, user_id: &str, vocabulary_size: usize) -> Result<AmbientSignals> {
        let mut signals = AmbientSignals {
            vocabulary_size,
            ..AmbientSignals::default()
        };

        for memory in self.store.list_memories(user_id).await? {
            for tag in memory.tags {
                signals.interests.insert(tag.to_lowercase());
            }
        }

        let self_entity = self.resolver.self_entity(user_id, Utc::now()).await?;
        let edges = self
            .store
            .list_relationships_from(user_id, self_entity.id)
            .await?;
        for entity in self.store.list_entities(user_id).await? {
            if entity.is_self || entity.kind != EntityKind::Person {
                continue;
            }
            let frequent = edges
                .iter()
                .any(|edge| edge.target_id == entity.id && edge.interaction_count >= 3);
            if entity.care_circle || frequent {
                signals.close_contacts.insert(entity.name.to_lowercase());
            }
        }
        Ok(signals)
    }
}
