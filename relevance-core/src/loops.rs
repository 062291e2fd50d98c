//! # Open-Loop Tracker
//!
//! Creates commitments from extracted features, suppresses duplicates,
//! closes loops explicitly or on lexically detected completion, and
//! expires overdue loops past the grace window.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::EntityResolver;
use crate::error::{Error, Result};
use crate::fingerprint::{fingerprint, tokenize};
use crate::lexicon::{is_stopword, COMPLETION_VERBS};
use crate::storage::DocumentStore;
use crate::types::{EntityKind, LoopState, Memory, OpenLoop};

/// Fingerprint for duplicate suppression: stable hash of the sorted set of
/// content tokens, so re-phrasings of the same obligation collide.
#[must_use]
pub fn loop_fingerprint(description: &str) -> String {
    let mut tokens: Vec<String> = tokenize(description)
        .into_iter()
        .filter(|token| token.len() > 2 && !is_stopword(token))
        .collect();
    tokens.sort();
    tokens.dedup();
    fingerprint(&tokens.join(" "))
}

/// Open-loop tracker over the document store.
pub struct OpenLoopTracker {
    store: Arc<dyn DocumentStore>,
    resolver: EntityResolver,
}

impl OpenLoopTracker {
    /// Create a tracker.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, resolver: EntityResolver) -> Self {
        Self { store, resolver }
    }

    /// Apply a memory's proposed commitments: create loops, or refresh the
    /// last-mention timestamp of duplicates. Returns the loops touched.
    pub async fn apply_commitments(&self, memory: &Memory, now: DateTime<Utc>) -> Result<Vec<OpenLoop>> {
        let mut touched = Vec::new();

        for commitment in &memory.features.commitments {
            let counterparty = self
                .resolver
                .resolve(&memory.user_id, &commitment.counterparty, EntityKind::Person, now)
                .await?;
            let description_fingerprint = loop_fingerprint(&commitment.description);

            let existing = self
                .store
                .list_loops(&memory.user_id)
                .await?
                .into_iter()
                .find(|l| {
                    l.state == LoopState::Open
                        && l.counterparty_id == counterparty.id
                        && l.description_fingerprint == description_fingerprint
                });

            if let Some(mut duplicate) = existing {
                duplicate.last_mentioned_at = now;
                self.store.put_loop(&duplicate).await?;
                debug!(loop_id = %duplicate.id, "duplicate commitment, refreshed last mention");
                touched.push(duplicate);
                continue;
            }

            let open_loop = OpenLoop {
                id: Uuid::new_v4(),
                user_id: memory.user_id.clone(),
                kind: commitment.polarity.into(),
                counterparty_id: counterparty.id,
                description: commitment.description.clone(),
                description_fingerprint,
                memory_id: memory.id,
                due_at: commitment.due_at,
                state: LoopState::Open,
                created_at: now,
                updated_at: now,
                last_mentioned_at: now,
            };
            self.store.put_loop(&open_loop).await?;
            info!(loop_id = %open_loop.id, counterparty = %counterparty.name, "open loop created");
            touched.push(open_loop);
        }

        Ok(touched)
    }

    /// Detect lexical completion assertions ("sent", "paid", "done" with a
    /// counterparty match) and close the matching open loops as `Done`.
    pub async fn apply_completions(&self, memory: &Memory, now: DateTime<Utc>) -> Result<Vec<OpenLoop>> {
        let lower = memory.text.to_lowercase();
        let tokens = tokenize(&lower);
        if !COMPLETION_VERBS.iter().any(|verb| tokens.contains(&(*verb).to_string())) {
            return Ok(Vec::new());
        }

        let content_tokens: Vec<String> = tokens
            .into_iter()
            .filter(|token| token.len() > 2 && !is_stopword(token))
            .collect();

        let mut closed = Vec::new();
        for person in &memory.features.people {
            let Some(counterparty) = self
                .store
                .find_entity_by_name(&memory.user_id, &person.surface)
                .await?
            else {
                continue;
            };

            let candidates = self
                .store
                .list_loops(&memory.user_id)
                .await?
                .into_iter()
                .filter(|l| l.state == LoopState::Open && l.counterparty_id == counterparty.id);

            for candidate in candidates {
                // The completion must reference what was owed, not just the
                // person ("sent Sarah the budget" closes the budget loop).
                let loop_tokens = tokenize(&candidate.description.to_lowercase());
                let overlaps = content_tokens
                    .iter()
                    .any(|token| loop_tokens.contains(token));
                if !overlaps {
                    continue;
                }
                if let Some(done) = self
                    .store
                    .close_loop_cas(&memory.user_id, candidate.id, LoopState::Done, now)
                    .await?
                {
                    info!(loop_id = %done.id, "loop closed by completion assertion");
                    closed.push(done);
                }
            }
        }

        Ok(closed)
    }

    /// Explicitly close a loop. `to` must be a terminal state.
    pub async fn close(
        &self,
        user_id: &str,
        loop_id: Uuid,
        to: LoopState,
        now: DateTime<Utc>,
    ) -> Result<OpenLoop> {
        if to == LoopState::Open {
            return Err(Error::Semantic("cannot close a loop to open".into()));
        }
        self.store
            .close_loop_cas(user_id, loop_id, to, now)
            .await?
            .ok_or(Error::NotFound(loop_id))
    }

    /// Expire open loops whose due date is more than `grace_days` past.
    /// A loop due exactly at `now` is not yet expired.
    pub async fn sweep_expired(
        &self,
        user_id: &str,
        grace_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OpenLoop>> {
        let grace = Duration::days(grace_days);
        let mut expired = Vec::new();
        for candidate in self.store.list_loops(user_id).await? {
            if candidate.state != LoopState::Open {
                continue;
            }
            let Some(due_at) = candidate.due_at else { continue };
            if now > due_at + grace {
                if let Some(loop_record) = self
                    .store
                    .close_loop_cas(user_id, candidate.id, LoopState::Expired, now)
                    .await?
                {
                    info!(loop_id = %loop_record.id, "loop expired past grace window");
                    expired.push(loop_record);
                }
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::lexical;
    use crate::storage::memory::InMemoryDocumentStore;

    fn tracker_with_store() -> (OpenLoopTracker, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let tracker = OpenLoopTracker::new(store.clone(), EntityResolver::new(store.clone()));
        (tracker, store)
    }

    fn memory_from(text: &str, now: DateTime<Utc>) -> Memory {
        let mut memory = Memory::new("u1".into(), text.into(), fingerprint(text), now);
        memory.features = lexical::extract(text, now);
        memory
    }

    #[tokio::test]
    async fn commitment_creates_loop_with_counterparty() {
        let (tracker, store) = tracker_with_store();
        let now = Utc::now();
        let memory = memory_from("I'll send Sarah the budget by Friday.", now);

        let loops = tracker.apply_commitments(&memory, now).await.unwrap();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].kind, crate::types::LoopKind::YouOweThem);
        assert!(loops[0].due_at.is_some());

        let counterparty = store
            .get_entity("u1", loops[0].counterparty_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counterparty.name, "Sarah");
    }

    #[tokio::test]
    async fn duplicate_commitment_refreshes_instead_of_creating() {
        let (tracker, store) = tracker_with_store();
        let now = Utc::now();
        let memory = memory_from("I'll send Sarah the budget by Friday.", now);

        tracker.apply_commitments(&memory, now).await.unwrap();
        tracker
            .apply_commitments(&memory, now + Duration::hours(1))
            .await
            .unwrap();

        let loops = store.list_loops("u1").await.unwrap();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].last_mentioned_at, now + Duration::hours(1));
    }

    #[tokio::test]
    async fn completion_assertion_closes_matching_loop() {
        let (tracker, store) = tracker_with_store();
        let now = Utc::now();
        let promise = memory_from("I'll send Sarah the budget by Friday.", now);
        tracker.apply_commitments(&promise, now).await.unwrap();

        let completion = memory_from("Sent Sarah the budget.", now + Duration::days(2));
        let closed = tracker
            .apply_completions(&completion, now + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].state, LoopState::Done);

        let stored = store.get_loop("u1", closed[0].id).await.unwrap().unwrap();
        assert_eq!(stored.state, LoopState::Done);
    }

    #[tokio::test]
    async fn unrelated_completion_does_not_close() {
        let (tracker, _) = tracker_with_store();
        let now = Utc::now();
        let promise = memory_from("I'll send Sarah the budget by Friday.", now);
        tracker.apply_commitments(&promise, now).await.unwrap();

        let completion = memory_from("Sent Sarah the birthday card.", now);
        let closed = tracker.apply_completions(&completion, now).await.unwrap();
        assert!(closed.is_empty());
    }

    #[tokio::test]
    async fn terminal_loop_rejects_further_transitions() {
        let (tracker, _) = tracker_with_store();
        let now = Utc::now();
        let memory = memory_from("I'll pay Marco back tomorrow.", now);
        let loops = tracker.apply_commitments(&memory, now).await.unwrap();

        tracker
            .close("u1", loops[0].id, LoopState::Done, now)
            .await
            .unwrap();
        let error = tracker
            .close("u1", loops[0].id, LoopState::Cancelled, now)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Semantic(_)));
    }

    #[tokio::test]
    async fn expiry_boundary_respects_grace_window() {
        let (tracker, store) = tracker_with_store();
        let now = Utc::now();
        let memory = memory_from("I'll pay Marco back tomorrow.", now);
        let loops = tracker.apply_commitments(&memory, now).await.unwrap();
        let due_at = loops[0].due_at.unwrap();
        let grace_days = 7;

        // Exactly at due date: not expired.
        assert!(tracker
            .sweep_expired("u1", grace_days, due_at)
            .await
            .unwrap()
            .is_empty());

        // Exactly at due + grace: still not expired.
        let at_grace = due_at + Duration::days(grace_days);
        assert!(tracker
            .sweep_expired("u1", grace_days, at_grace)
            .await
            .unwrap()
            .is_empty());

        // One second past due + grace: expired.
        let expired = tracker
            .sweep_expired("u1", grace_days, at_grace + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        let stored = store.get_loop("u1", expired[0].id).await.unwrap().unwrap();
        assert_eq!(stored.state, LoopState::Expired);
    }
}
