//! # Retrieval and Context Gate
//!
//! Query pipeline: embed the query, over-fetch vector candidates, fuse
//! semantic similarity with decayed salience, gate against the active
//! context frame, and return the top results. An empty query falls back to
//! the most salient active memories under the same gate.

pub mod cache;
pub mod gate;

pub use cache::{QueryCache, QueryCacheMetrics, QueryKey};
pub use gate::{gate_value, ContextGate};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::{FUSION_SALIENCE_WEIGHT, FUSION_SEMANTIC_WEIGHT, RECENCY_HALF_LIFE_DAYS};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::storage::{DocumentStore, VectorIndex};
use crate::types::{ContextFrame, Memory, MemoryCategory};

/// Filters narrowing a recall query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecallFilters {
    /// Every listed tag must be present on the memory.
    pub tags: Vec<String>,
    /// Restrict to one category.
    pub category: Option<MemoryCategory>,
}

/// A recall request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Owning user.
    pub user_id: String,
    /// Query text; `None` or empty means "most salient in context".
    pub query: Option<String>,
    /// Maximum results.
    pub limit: usize,
    /// Owner-only flag to surface suppressed memories.
    pub include_suppressed: bool,
    /// Narrowing filters.
    pub filters: RecallFilters,
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    /// The memory record.
    pub memory: Memory,
    /// Final fused (and gated) score.
    pub score: f32,
    /// Semantic similarity component, 0 for the empty-query path.
    pub semantic_similarity: f32,
    /// Gate value when a frame was active; `None` otherwise.
    pub gate: Option<f32>,
}

/// Retrieval outcome; `degraded` marks reduced-fidelity results.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Ranked results, best first.
    pub items: Vec<RetrievedMemory>,
    /// True when a budget forced reduced-K retrieval.
    pub degraded: bool,
    /// Human-readable degradation reason.
    pub degraded_reason: Option<String>,
}

/// Recency decay with the fusion half-life.
#[must_use]
pub fn recency_decay(age_days: f32) -> f32 {
    0.5_f32.powf(age_days.max(0.0) / RECENCY_HALF_LIFE_DAYS)
}

/// Text embedded for a memory: content plus tags and extracted topics, so
/// project tags participate in semantic and gate similarity.
#[must_use]
pub fn memory_embedding_text(memory: &Memory) -> String {
    let mut parts = vec![memory.text.clone()];
    parts.extend(memory.tags.iter().cloned());
    parts.extend(memory.features.topics.iter().cloned());
    parts.join(" ")
}

/// The retrieval pipeline.
pub struct RetrievalPipeline {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: ContextGate,
    overfetch: usize,
    vector_timeout: Duration,
}

impl RetrievalPipeline {
    /// Create a pipeline from config and its collaborators.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            gate: ContextGate::new(config.gate_threshold, config.gate_min),
            overfetch: config.retrieval_overfetch_factor,
            vector_timeout: Duration::from_millis(config.vector_timeout_ms),
        }
    }

    /// Run a retrieval request.
    ///
    /// `active_frame` must already be expiry-checked by the caller;
    /// `adjustments` carries per-context vote deltas from resolved recall
    /// sessions for the currently active context key.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        active_frame: Option<&ContextFrame>,
        adjustments: &HashMap<Uuid, f32>,
        now: DateTime<Utc>,
    ) -> Result<RetrievalOutcome> {
        let frame_embedding = match active_frame {
            Some(frame) => Some(self.embedder.embed(&frame.synthesized_query()).await?),
            None => None,
        };

        match request.query.as_deref().filter(|q| !q.trim().is_empty()) {
            Some(query) => {
                self.retrieve_semantic(request, query, frame_embedding.as_deref(), adjustments, now)
                    .await
            }
            None => {
                self.retrieve_salient(request, frame_embedding.as_deref(), adjustments, now)
                    .await
            }
        }
    }

    /// Retrieve by query embedding against stored candidates, the same
    /// arithmetic as [`retrieve`] but starting from a caller-supplied
    /// vector. Used by recall sessions for refined and spark queries.
    pub async fn retrieve_by_embedding(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetrievedMemory>> {
        let (matches, _) = self.vector_query(user_id, query_embedding, limit * self.overfetch).await?;
        let mut items = Vec::new();
        for candidate in matches {
            let Some(memory) = self.store.get_memory(user_id, candidate.memory_id).await? else {
                continue;
            };
            if !memory.is_readable(false) {
                continue;
            }
            let score = self.fuse(candidate.similarity, &memory, now, 0.0);
            items.push(RetrievedMemory {
                memory,
                score,
                semantic_similarity: candidate.similarity,
                gate: None,
            });
        }
        sort_ranked(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    async fn retrieve_semantic(
        &self,
        request: &RetrievalRequest,
        query: &str,
        frame_embedding: Option<&[f32]>,
        adjustments: &HashMap<Uuid, f32>,
        now: DateTime<Utc>,
    ) -> Result<RetrievalOutcome> {
        let query_embedding = self.embedder.embed(query).await?;
        let k = request.limit.max(1) * self.overfetch;
        let (matches, degraded_reason) =
            self.vector_query(&request.user_id, &query_embedding, k).await?;

        let mut items = Vec::new();
        for candidate in matches {
            let Some(memory) = self
                .store
                .get_memory(&request.user_id, candidate.memory_id)
                .await?
            else {
                // Projection ahead of the document store; skip and let the
                // repair job reconcile.
                warn!(memory_id = %candidate.memory_id, "vector match without document row");
                continue;
            };
            if !self.passes_filters(&memory, request) {
                continue;
            }
            let adjustment = adjustments.get(&memory.id).copied().unwrap_or(0.0);
            let fused = self.fuse(candidate.similarity, &memory, now, adjustment);
            let Some((score, gate)) = self.gated(fused, &memory, frame_embedding).await? else {
                continue;
            };
            items.push(RetrievedMemory {
                memory,
                score,
                semantic_similarity: candidate.similarity,
                gate,
            });
        }

        sort_ranked(&mut items);
        items.truncate(request.limit);
        Ok(RetrievalOutcome {
            items,
            degraded: degraded_reason.is_some(),
            degraded_reason,
        })
    }

    async fn retrieve_salient(
        &self,
        request: &RetrievalRequest,
        frame_embedding: Option<&[f32]>,
        adjustments: &HashMap<Uuid, f32>,
        now: DateTime<Utc>,
    ) -> Result<RetrievalOutcome> {
        let mut items = Vec::new();
        for memory in self.store.list_memories(&request.user_id).await? {
            if !self.passes_filters(&memory, request) {
                continue;
            }
            let adjustment = adjustments.get(&memory.id).copied().unwrap_or(0.0);
            let fused = self.fuse(0.0, &memory, now, adjustment);
            let Some((score, gate)) = self.gated(fused, &memory, frame_embedding).await? else {
                continue;
            };
            items.push(RetrievedMemory {
                memory,
                score,
                semantic_similarity: 0.0,
                gate,
            });
        }
        sort_ranked(&mut items);
        items.truncate(request.limit);
        Ok(RetrievalOutcome {
            items,
            degraded: false,
            degraded_reason: None,
        })
    }

    /// Vector query under the configured budget, degrading to reduced K
    /// on the first deadline and erroring on the second.
    async fn vector_query(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<(Vec<crate::storage::VectorMatch>, Option<String>)> {
        match tokio::time::timeout(self.vector_timeout, self.index.query(user_id, embedding, k))
            .await
        {
            Ok(matches) => Ok((matches?, None)),
            Err(_) => {
                let reduced = k / self.overfetch.max(1);
                warn!(user_id, k, reduced, "vector query deadline, retrying reduced-K");
                match tokio::time::timeout(
                    self.vector_timeout,
                    self.index.query(user_id, embedding, reduced.max(1)),
                )
                .await
                {
                    Ok(matches) => Ok((
                        matches?,
                        Some(format!("vector deadline exceeded, reduced K to {reduced}")),
                    )),
                    Err(_) => Err(Error::Timeout("vector query exceeded budget twice".into())),
                }
            }
        }
    }

    fn passes_filters(&self, memory: &Memory, request: &RetrievalRequest) -> bool {
        if !memory.is_readable(request.include_suppressed) {
            return false;
        }
        if let Some(category) = request.filters.category {
            if memory.features.category != category {
                return false;
            }
        }
        request
            .filters
            .tags
            .iter()
            .all(|tag| memory.tags.contains(tag))
    }

    fn fuse(&self, semantic: f32, memory: &Memory, now: DateTime<Utc>, adjustment: f32) -> f32 {
        let age_days = (now - memory.created_at).num_seconds() as f32 / 86_400.0;
        let salience = (memory.salience.current_score / 100.0).clamp(0.0, 1.0);
        let fused = FUSION_SEMANTIC_WEIGHT * semantic
            + FUSION_SALIENCE_WEIGHT * salience * recency_decay(age_days);
        // Per-context vote adjustments from resolved recall sessions.
        fused + 0.05 * adjustment
    }

    async fn gated(
        &self,
        score: f32,
        memory: &Memory,
        frame_embedding: Option<&[f32]>,
    ) -> Result<Option<(f32, Option<f32>)>> {
        let Some(frame_embedding) = frame_embedding else {
            return Ok(Some((score, None)));
        };
        let candidate_embedding = match self.index.get(&memory.user_id, memory.id).await? {
            Some(embedding) => embedding,
            // Embedding side effect not yet landed; embed on the fly.
            None => self.embedder.embed(&memory_embedding_text(memory)).await?,
        };
        match self.gate.apply(frame_embedding, &candidate_embedding) {
            Some(alpha) => {
                debug!(memory_id = %memory.id, alpha, "context gate applied");
                Ok(Some((score * alpha, Some(alpha))))
            }
            None => Ok(None),
        }
    }
}

/// Sort best-first; ties break toward the more recently created memory.
fn sort_ranked(items: &mut [RetrievedMemory]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedBagEmbedder;
    use crate::fingerprint::fingerprint;
    use crate::storage::memory::{InMemoryDocumentStore, InMemoryVectorIndex};
    use crate::types::LifecycleState;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        pipeline: RetrievalPipeline,
        store: Arc<InMemoryDocumentStore>,
        index: Arc<InMemoryVectorIndex>,
        embedder: Arc<HashedBagEmbedder>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let embedder = Arc::new(HashedBagEmbedder::new());
        let pipeline = RetrievalPipeline::new(
            &EngineConfig::default(),
            store.clone(),
            index.clone(),
            embedder.clone(),
        );
        Fixture {
            pipeline,
            store,
            index,
            embedder,
        }
    }

    async fn seed(fixture: &Fixture, text: &str, tags: &[&str], salience: f32) -> Memory {
        let mut memory = Memory::new("u1".into(), text.into(), fingerprint(text), Utc::now());
        memory.tags = tags.iter().map(|t| (*t).to_string()).collect();
        memory.salience.current_score = salience;
        fixture.store.put_memory(&memory).await.unwrap();
        let embedding = fixture
            .embedder
            .embed(&memory_embedding_text(&memory))
            .await
            .unwrap();
        fixture
            .index
            .upsert("u1", memory.id, embedding, memory.logical_ts())
            .await
            .unwrap();
        memory
    }

    fn request(query: &str, limit: usize) -> RetrievalRequest {
        RetrievalRequest {
            user_id: "u1".into(),
            query: Some(query.to_string()),
            limit,
            include_suppressed: false,
            filters: RecallFilters::default(),
        }
    }

    #[tokio::test]
    async fn semantic_match_ranks_first() {
        let fixture = fixture();
        let relevant = seed(&fixture, "refactor the payments checkout flow", &[], 40.0).await;
        seed(&fixture, "grandma birthday cake recipe", &[], 40.0).await;

        let outcome = fixture
            .pipeline
            .retrieve(&request("payments refactor", 2), None, &HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.items[0].memory.id, relevant.id);
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn deleted_and_suppressed_are_hidden() {
        let fixture = fixture();
        let mut deleted = seed(&fixture, "secret plan alpha", &[], 90.0).await;
        deleted.state = LifecycleState::Deleted;
        fixture.store.put_memory(&deleted).await.unwrap();

        let mut suppressed = seed(&fixture, "secret plan beta", &[], 90.0).await;
        suppressed.state = LifecycleState::Suppressed;
        fixture.store.put_memory(&suppressed).await.unwrap();

        let outcome = fixture
            .pipeline
            .retrieve(&request("secret plan", 10), None, &HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert!(outcome.items.is_empty());

        // The owner can opt in to suppressed, never to deleted.
        let mut with_flag = request("secret plan", 10);
        with_flag.include_suppressed = true;
        let outcome = fixture
            .pipeline
            .retrieve(&with_flag, None, &HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].memory.id, suppressed.id);
    }

    #[tokio::test]
    async fn context_frame_prefers_matching_project() {
        let fixture = fixture();
        let payments = seed(
            &fixture,
            "refactor the payment handler module",
            &["payments"],
            40.0,
        )
        .await;
        seed(&fixture, "refactor the avatar upload module", &[], 40.0).await;

        let now = Utc::now();
        let frame = ContextFrame {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            location: Some("vscode".into()),
            people: vec![],
            activity: None,
            project: Some("payments".into()),
            tags: vec![],
            started_at: now,
            expires_at: now + ChronoDuration::hours(4),
            active: true,
        };

        let outcome = fixture
            .pipeline
            .retrieve(&request("refactor", 2), Some(&frame), &HashMap::new(), now)
            .await
            .unwrap();
        assert_eq!(outcome.items[0].memory.id, payments.id);
        assert!(outcome.items[0].gate.unwrap() > outcome.items[1].gate.unwrap());
    }

    #[tokio::test]
    async fn empty_query_returns_most_salient() {
        let fixture = fixture();
        seed(&fixture, "minor note about stationery", &[], 10.0).await;
        let urgent = seed(&fixture, "father in hospital call back", &[], 95.0).await;

        let mut empty = request("", 2);
        empty.query = None;
        let outcome = fixture
            .pipeline
            .retrieve(&empty, None, &HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.items[0].memory.id, urgent.id);
        assert!((outcome.items[0].semantic_similarity).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn recency_decay_demotes_old_equally_salient_memories() {
        let fixture = fixture();
        let fresh = seed(&fixture, "note one about planning", &[], 60.0).await;
        let mut stale = seed(&fixture, "note two about planning", &[], 60.0).await;
        stale.created_at = Utc::now() - ChronoDuration::days(60);
        fixture.store.put_memory(&stale).await.unwrap();

        let mut empty = request("", 2);
        empty.query = None;
        let outcome = fixture
            .pipeline
            .retrieve(&empty, None, &HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.items[0].memory.id, fresh.id);
    }

    #[tokio::test]
    async fn tag_filter_narrows_results() {
        let fixture = fixture();
        seed(&fixture, "sprint retro notes", &["work"], 50.0).await;
        let tagged = seed(&fixture, "sprint planning notes", &["work", "planning"], 50.0).await;

        let mut filtered = request("sprint notes", 5);
        filtered.filters.tags = vec!["planning".into()];
        let outcome = fixture
            .pipeline
            .retrieve(&filtered, None, &HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].memory.id, tagged.id);
    }

    #[tokio::test]
    async fn vote_adjustments_shift_ranking() {
        let fixture = fixture();
        let first = seed(&fixture, "database migration checklist", &[], 50.0).await;
        let second = seed(&fixture, "database migration retrospective", &[], 50.0).await;

        let mut adjustments = HashMap::new();
        adjustments.insert(second.id, 3.0);
        adjustments.insert(first.id, -3.0);

        let outcome = fixture
            .pipeline
            .retrieve(
                &request("database migration", 2),
                None,
                &adjustments,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.items[0].memory.id, second.id);
    }

    #[test]
    fn decay_half_life() {
        assert!((recency_decay(0.0) - 1.0).abs() < 1e-6);
        assert!((recency_decay(14.0) - 0.5).abs() < 1e-6);
        assert!(recency_decay(56.0) < 0.07);
    }
}
