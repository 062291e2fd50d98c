//! # Recall Sessions ("on second thought")
//!
//! Iterative retrieval with vote-based refinement. Each round re-ranks by
//! vector arithmetic over the voted candidates' embeddings; `spark` votes
//! open lateral branches; resolving applies small per-context score
//! adjustments, never global ones. Unresolved sessions expire on a short
//! TTL.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::RECALL_SESSION_TTL_SECS;
use crate::embeddings::{weighted_mean, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::retrieval::{memory_embedding_text, RetrievalPipeline, RetrievedMemory};
use crate::storage::{DocumentStore, VectorIndex};
use crate::types::{RecallRound, RecallSession, Vote};

/// Suppression strength: how hard cold/wrong centroids push the refined
/// query away.
const SUPPRESS_WEIGHT: f32 = 0.3;

/// Vote weights for the anchor centroid.
const HOT_WEIGHT: f32 = 1.0;
const WARM_WEIGHT: f32 = 0.4;

/// Per-context adjustment deltas applied at resolve time.
const RESOLVE_DELTAS: [(Vote, f32); 5] = [
    (Vote::Hot, 1.0),
    (Vote::Warm, 0.4),
    (Vote::Cold, -0.7),
    (Vote::Wrong, -1.0),
    (Vote::Spark, 0.0),
];

/// A lateral branch opened by a spark vote.
#[derive(Debug, Clone)]
pub struct SparkBranch {
    /// The spark candidate the branch grew from.
    pub source: Uuid,
    /// Branch results, ranked.
    pub candidates: Vec<RetrievedMemory>,
}

/// Result of a vote round.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// Re-ranked main candidates.
    pub candidates: Vec<RetrievedMemory>,
    /// Lateral branches from spark votes, labelled by source.
    pub branches: Vec<SparkBranch>,
}

/// Recall session manager.
pub struct RecallSessionManager {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    pipeline: Arc<RetrievalPipeline>,
    /// Per-context score adjustments from resolved sessions, keyed by
    /// `(user_id, context_key)`. A projection; loss on restart only
    /// forgets recent vote feedback.
    adjustments: RwLock<HashMap<(String, String), HashMap<Uuid, f32>>>,
}

impl RecallSessionManager {
    /// Create a session manager.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        pipeline: Arc<RetrievalPipeline>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            pipeline,
            adjustments: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session with a first-round query.
    pub async fn start(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<(RecallSession, Vec<RetrievedMemory>)> {
        let query_embedding = self.embedder.embed(query).await?;
        let candidates = self
            .pipeline
            .retrieve_by_embedding(user_id, &query_embedding, limit, now)
            .await?;

        let session = RecallSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            original_query: query.to_string(),
            rounds: vec![RecallRound {
                query_embedding,
                candidates: candidates.iter().map(|c| c.memory.id).collect(),
                votes: HashMap::new(),
            }],
            resolved: false,
            created_at: now,
            expires_at: now + Duration::seconds(RECALL_SESSION_TTL_SECS as i64),
        };
        self.store.put_session(&session).await?;
        info!(user_id, session_id = %session.id, "recall session started");
        Ok((session, candidates))
    }

    /// Apply a round of votes and return the refined ranking.
    pub async fn vote(
        &self,
        user_id: &str,
        session_id: Uuid,
        votes: HashMap<Uuid, Vote>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome> {
        let mut session = self.load_live(user_id, session_id, now).await?;

        let Some(last_round) = session.rounds.last_mut() else {
            return Err(Error::Semantic("session has no rounds".into()));
        };
        last_round.votes = votes.clone();
        let previous_embedding = last_round.query_embedding.clone();

        // Gather voted embeddings.
        let mut anchor_parts: Vec<(Vec<f32>, f32)> = Vec::new();
        let mut suppress_parts: Vec<(Vec<f32>, f32)> = Vec::new();
        let mut sparks: Vec<Uuid> = Vec::new();
        let mut excluded: Vec<Uuid> = Vec::new();
        for (memory_id, vote) in &votes {
            let embedding = self.embedding_of(user_id, *memory_id).await?;
            match vote {
                Vote::Hot => anchor_parts.push((embedding, HOT_WEIGHT)),
                Vote::Warm => anchor_parts.push((embedding, WARM_WEIGHT)),
                Vote::Cold | Vote::Wrong => {
                    suppress_parts.push((embedding, 1.0));
                    excluded.push(*memory_id);
                }
                Vote::Spark => sparks.push(*memory_id),
            }
        }

        let dimension = self.embedder.dimension();
        let refined = if anchor_parts.is_empty() && suppress_parts.is_empty() {
            // No directional votes: the round repeats the prior query.
            previous_embedding
        } else {
            let anchor = if anchor_parts.is_empty() {
                previous_embedding
            } else {
                weighted_mean(&anchor_parts, dimension)
            };
            let suppress = weighted_mean(&suppress_parts, dimension);
            anchor
                .iter()
                .zip(suppress.iter())
                .map(|(a, s)| SUPPRESS_WEIGHT.mul_add(-s, *a))
                .collect()
        };

        // Over-fetch so exclusions do not shrink the round.
        let fetched = self
            .pipeline
            .retrieve_by_embedding(user_id, &refined, limit + excluded.len(), now)
            .await?;
        let candidates: Vec<RetrievedMemory> = fetched
            .into_iter()
            .filter(|c| !excluded.contains(&c.memory.id))
            .take(limit)
            .collect();

        let mut branches = Vec::new();
        for spark in sparks {
            let embedding = self.embedding_of(user_id, spark).await?;
            let branch_candidates = self
                .pipeline
                .retrieve_by_embedding(user_id, &embedding, limit, now)
                .await?
                .into_iter()
                .filter(|c| c.memory.id != spark)
                .collect();
            branches.push(SparkBranch {
                source: spark,
                candidates: branch_candidates,
            });
        }

        session.rounds.push(RecallRound {
            query_embedding: refined,
            candidates: candidates.iter().map(|c| c.memory.id).collect(),
            votes: HashMap::new(),
        });
        self.store.put_session(&session).await?;
        debug!(session_id = %session.id, rounds = session.rounds.len(), "vote round applied");

        Ok(VoteOutcome { candidates, branches })
    }

    /// Resolve a session, folding its votes into per-context adjustments
    /// under `context_key`.
    pub async fn resolve(
        &self,
        user_id: &str,
        session_id: Uuid,
        context_key: &str,
        now: DateTime<Utc>,
    ) -> Result<RecallSession> {
        let mut session = self.load_live(user_id, session_id, now).await?;
        session.resolved = true;
        self.store.put_session(&session).await?;

        let mut deltas: HashMap<Uuid, f32> = HashMap::new();
        for round in &session.rounds {
            for (memory_id, vote) in &round.votes {
                let delta = RESOLVE_DELTAS
                    .iter()
                    .find(|(v, _)| v == vote)
                    .map_or(0.0, |(_, d)| *d);
                *deltas.entry(*memory_id).or_default() += delta;
            }
        }
        if !deltas.is_empty() {
            let mut adjustments = self.adjustments.write();
            let scoped = adjustments
                .entry((user_id.to_string(), context_key.to_string()))
                .or_default();
            for (memory_id, delta) in deltas {
                *scoped.entry(memory_id).or_default() += delta;
            }
        }
        info!(session_id = %session.id, context_key, "recall session resolved");
        Ok(session)
    }

    /// Adjustments for a user in a context, for the retrieval pipeline.
    #[must_use]
    pub fn adjustments_for(&self, user_id: &str, context_key: &str) -> HashMap<Uuid, f32> {
        self.adjustments
            .read()
            .get(&(user_id.to_string(), context_key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Delete expired unresolved sessions. Returns how many were dropped.
    pub async fn expire_sweep(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut dropped = 0;
        for session in self.store.list_sessions(user_id).await? {
            if !session.resolved && session.expires_at <= now {
                self.store.delete_session(user_id, session.id).await?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    async fn load_live(
        &self,
        user_id: &str,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RecallSession> {
        let session = self
            .store
            .get_session(user_id, session_id)
            .await?
            .ok_or(Error::NotFound(session_id))?;
        if session.resolved {
            return Err(Error::Semantic("session already resolved".into()));
        }
        if session.expires_at <= now {
            self.store.delete_session(user_id, session_id).await?;
            return Err(Error::Semantic("session expired".into()));
        }
        Ok(session)
    }

    async fn embedding_of(&self, user_id: &str, memory_id: Uuid) -> Result<Vec<f32>> {
        if let Some(embedding) = self.index.get(user_id, memory_id).await? {
            return Ok(embedding);
        }
        // Projection gap: embed from the document row.
        let memory = self
            .store
            .get_memory(user_id, memory_id)
            .await?
            .ok_or(Error::NotFound(memory_id))?;
        self.embedder.embed(&memory_embedding_text(&memory)).await
    }
}
