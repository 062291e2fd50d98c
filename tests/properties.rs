//! Property-based invariants.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

use relevance_core::config::EngineConfig;
use relevance_core::embeddings::{EmbeddingProvider, HashedBagEmbedder};
use relevance_core::fingerprint::{fingerprint, normalize};
use relevance_core::retrieval::{
    gate_value, memory_embedding_text, recency_decay, RetrievalPipeline, RetrievalRequest,
};
use relevance_core::salience::{AmbientSignals, SalienceCalculator};
use relevance_core::storage::memory::{InMemoryDocumentStore, InMemoryVectorIndex};
use relevance_core::storage::VectorIndex;
use relevance_core::types::{LifecycleState, Memory};
use relevance_core::DocumentStore;

fn lifecycle_strategy() -> impl Strategy<Value = LifecycleState> {
    prop_oneof![
        Just(LifecycleState::Active),
        Just(LifecycleState::Archived),
        Just(LifecycleState::Suppressed),
        Just(LifecycleState::Deleted),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Same text, same ambient signals, same weights: same score.
    #[test]
    fn salience_is_deterministic(text in "[ -~]{1,200}") {
        let features = relevance_core::extraction::lexical::extract(&text, chrono::Utc::now());
        let signals = AmbientSignals {
            vocabulary_size: 50,
            ..AmbientSignals::default()
        };
        let calculator = SalienceCalculator::default();
        let first = calculator.score(&features, &text, &signals);
        let second = calculator.score(&features, &text, &signals);
        prop_assert_eq!(first, second);
    }

    /// Normalization is idempotent, and fingerprints ignore whitespace
    /// and case variation.
    #[test]
    fn normalization_idempotent(text in "[ -~\\t\\n]{0,200}") {
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once.clone());
        let noisy = format!("  {}  ", once.to_uppercase().replace(' ', "\t "));
        prop_assert_eq!(fingerprint(&once), fingerprint(&normalize(&noisy)));
    }

    /// The context gate is monotone in similarity and bounded in (0, 1).
    #[test]
    fn gate_monotone_and_bounded(a in 0.0_f32..1.0, b in 0.0_f32..1.0) {
        let low = a.min(b);
        let high = a.max(b);
        let gate_low = gate_value(low, 0.5);
        let gate_high = gate_value(high, 0.5);
        prop_assert!(gate_low > 0.0 && gate_low < 1.0);
        prop_assert!(gate_low <= gate_high);
    }

    /// Recency decay is bounded and monotone decreasing.
    #[test]
    fn decay_bounded_and_monotone(age_a in 0.0_f32..1000.0, age_b in 0.0_f32..1000.0) {
        let young = age_a.min(age_b);
        let old = age_a.max(age_b);
        let decay_young = recency_decay(young);
        let decay_old = recency_decay(old);
        prop_assert!(decay_young <= 1.0 && decay_young > 0.0);
        prop_assert!(decay_old <= decay_young);
    }

    /// Retrieval only ever returns the requesting user's active (or, with
    /// the explicit flag, suppressed) memories.
    #[test]
    fn retrieval_is_user_scoped_and_state_filtered(
        states in proptest::collection::vec(lifecycle_strategy(), 1..12),
        include_suppressed in proptest::bool::ANY,
    ) {
        let runtime = Runtime::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
        runtime.block_on(async move {
            let store = Arc::new(InMemoryDocumentStore::new());
            let index = Arc::new(InMemoryVectorIndex::new());
            let embedder = Arc::new(HashedBagEmbedder::new());
            let pipeline = RetrievalPipeline::new(
                &EngineConfig::default(),
                store.clone(),
                index.clone(),
                embedder.clone(),
            );
            let now = chrono::Utc::now();

            for (position, state) in states.iter().enumerate() {
                for user in ["u1", "u2"] {
                    let text = format!("shared planning note number {position}");
                    let mut memory =
                        Memory::new(user.to_string(), text.clone(), fingerprint(&text), now);
                    memory.state = *state;
                    memory.salience.current_score = 50.0;
                    store.put_memory(&memory).await.unwrap();
                    let embedding = embedder
                        .embed(&memory_embedding_text(&memory))
                        .await
                        .unwrap();
                    index
                        .upsert(user, memory.id, embedding, memory.logical_ts())
                        .await
                        .unwrap();
                }
            }

            let request = RetrievalRequest {
                user_id: "u1".into(),
                query: Some("planning note".into()),
                limit: 50,
                include_suppressed,
                filters: relevance_core::retrieval::RecallFilters::default(),
            };
            let outcome = pipeline
                .retrieve(&request, None, &HashMap::new(), now)
                .await
                .unwrap();

            for item in &outcome.items {
                assert_eq!(item.memory.user_id, "u1");
                match item.memory.state {
                    LifecycleState::Active => {}
                    LifecycleState::Suppressed => assert!(include_suppressed),
                    other => panic!("retrieval returned a {other:?} memory"),
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Once a loop reaches a terminal state, no transition re-opens it.
    #[test]
    fn terminal_loops_never_reopen(close_attempts in 1_u8..5) {
        let runtime = Runtime::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
        runtime.block_on(async move {
            let store = Arc::new(InMemoryDocumentStore::new());
            let now = chrono::Utc::now();
            let open_loop = relevance_core::types::OpenLoop {
                id: uuid::Uuid::new_v4(),
                user_id: "u1".into(),
                kind: relevance_core::types::LoopKind::YouOweThem,
                counterparty_id: uuid::Uuid::new_v4(),
                description: "return the ladder".into(),
                description_fingerprint: fingerprint("return the ladder"),
                memory_id: uuid::Uuid::new_v4(),
                due_at: None,
                state: relevance_core::types::LoopState::Open,
                created_at: now,
                updated_at: now,
                last_mentioned_at: now,
            };
            store.put_loop(&open_loop).await.unwrap();
            store
                .close_loop_cas("u1", open_loop.id, relevance_core::types::LoopState::Done, now)
                .await
                .unwrap();

            for _ in 0..close_attempts {
                let error = store
                    .close_loop_cas(
                        "u1",
                        open_loop.id,
                        relevance_core::types::LoopState::Cancelled,
                        now,
                    )
                    .await
                    .unwrap_err();
                assert!(matches!(error, relevance_core::Error::Semantic(_)));
            }
            let stored = store.get_loop("u1", open_loop.id).await.unwrap().unwrap();
            assert_eq!(stored.state, relevance_core::types::LoopState::Done);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
