//! Boundary behaviors across the engine surface.

use chrono::{Duration, Utc};
use std::sync::Arc;

use relevance_core::config::EngineConfig;
use relevance_core::engine::{ForgetMode, LoopFilter};
use relevance_core::entities::EntityResolver;
use relevance_core::error::Error;
use relevance_core::ingest::IngestHints;
use relevance_core::loops::OpenLoopTracker;
use relevance_core::retrieval::RecallFilters;
use relevance_core::storage::hot_key;
use relevance_core::storage::memory::InMemoryHotCache;
use relevance_core::storage::HotCache;
use relevance_core::types::{LifecycleState, LoopState, Memory};
use relevance_core::DocumentStore;
use test_utils::{engine_fixture, store_settled};

const MAX_TEXT: usize = 10_000;

#[tokio::test]
async fn text_length_boundary() {
    let fixture = engine_fixture(EngineConfig::default());

    let at_limit = "a".repeat(MAX_TEXT);
    assert!(fixture
        .engine
        .store_memory("u1", "d", &at_limit, IngestHints::default())
        .await
        .is_ok());

    let over = "a".repeat(MAX_TEXT + 1);
    let error = fixture
        .engine
        .store_memory("u1", "d", &over, IngestHints::default())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Validation(_)));
    // The failed call left no side effects.
    fixture.engine.wait_idle().await;
    assert_eq!(fixture.store.list_memories("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn loop_expiry_boundary() {
    let fixture = engine_fixture(EngineConfig::default());
    store_settled(&fixture, "u1", "I'll pay Marco back tomorrow.")
        .await
        .unwrap();

    let loops = fixture
        .engine
        .list_loops("u1", LoopFilter::default())
        .await
        .unwrap();
    let due = loops[0].due_at.unwrap();
    let grace_days = fixture.engine.config().loop_grace_days;

    let tracker = OpenLoopTracker::new(
        fixture.store.clone(),
        EntityResolver::new(fixture.store.clone()),
    );

    // Due exactly now: open. Due + grace: still open. One second past: expired.
    assert!(tracker
        .sweep_expired("u1", grace_days, due)
        .await
        .unwrap()
        .is_empty());
    assert!(tracker
        .sweep_expired("u1", grace_days, due + Duration::days(grace_days))
        .await
        .unwrap()
        .is_empty());
    let expired = tracker
        .sweep_expired(
            "u1",
            grace_days,
            due + Duration::days(grace_days) + Duration::seconds(1),
        )
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].state, LoopState::Expired);
}

#[tokio::test]
async fn hot_cache_capacity_evicts_lru_before_promoting() {
    let cache = InMemoryHotCache::with_capacity(2);
    let ttl = std::time::Duration::from_secs(60);
    let now = Utc::now();
    let make = |text: &str| {
        Memory::new(
            "u1".into(),
            text.into(),
            relevance_core::fingerprint::fingerprint(text),
            now,
        )
    };

    let a = make("first");
    let b = make("second");
    let c = make("third");
    cache.put(&hot_key("u1", a.id), &a, ttl).await.unwrap();
    cache.put(&hot_key("u1", b.id), &b, ttl).await.unwrap();
    cache.get(&hot_key("u1", a.id)).await.unwrap();
    cache.put(&hot_key("u1", c.id), &c, ttl).await.unwrap();

    assert_eq!(cache.len().await.unwrap(), 2);
    assert!(cache.get(&hot_key("u1", b.id)).await.unwrap().is_none());
    assert!(cache.get(&hot_key("u1", a.id)).await.unwrap().is_some());
}

#[tokio::test]
async fn suppress_then_restore_is_indistinguishable() {
    let fixture = engine_fixture(EngineConfig::default());
    let memory_id = store_settled(&fixture, "u1", "Passport renewal appointment notes.")
        .await
        .unwrap();
    let original = fixture
        .store
        .get_memory("u1", memory_id)
        .await
        .unwrap()
        .unwrap();

    fixture
        .engine
        .forget("u1", memory_id, ForgetMode::Suppress)
        .await
        .unwrap();

    // Hidden from normal recall while suppressed.
    let hidden = fixture
        .engine
        .recall("u1", Some("passport"), RecallFilters::default(), 5, false)
        .await
        .unwrap();
    assert!(hidden.items.is_empty());

    // Restore: every field reads exactly as before the suppression.
    let restored = fixture.engine.restore("u1", memory_id).await.unwrap();
    assert_eq!(restored, original);

    // Suppressed memories do surface for the owner's explicit flag.
    fixture
        .engine
        .forget("u1", memory_id, ForgetMode::Suppress)
        .await
        .unwrap();
    let surfaced = fixture
        .engine
        .recall("u1", Some("passport"), RecallFilters::default(), 5, true)
        .await
        .unwrap();
    assert_eq!(surfaced.items.len(), 1);
}

#[tokio::test]
async fn delete_restores_only_within_grace() {
    let fixture = engine_fixture(EngineConfig::default());
    let memory_id = store_settled(&fixture, "u1", "Old tax documents location.")
        .await
        .unwrap();

    fixture
        .engine
        .forget("u1", memory_id, ForgetMode::Delete)
        .await
        .unwrap();

    // Deleted memories never surface, even with the suppressed flag.
    let gone = fixture
        .engine
        .recall("u1", Some("tax documents"), RecallFilters::default(), 5, true)
        .await
        .unwrap();
    assert!(gone.items.is_empty());

    // Within the grace window: restorable.
    let restored = fixture.engine.restore("u1", memory_id).await.unwrap();
    assert_eq!(restored.state, LifecycleState::Active);

    // Delete again and age the tombstone past the grace window.
    fixture
        .engine
        .forget("u1", memory_id, ForgetMode::Delete)
        .await
        .unwrap();
    let mut aged = fixture
        .store
        .get_memory("u1", memory_id)
        .await
        .unwrap()
        .unwrap();
    aged.deleted_at = Some(Utc::now() - Duration::days(30));
    fixture.store.put_memory(&aged).await.unwrap();

    let error = fixture.engine.restore("u1", memory_id).await.unwrap_err();
    assert!(matches!(error, Error::Semantic(_)));
}

#[tokio::test]
async fn export_import_reproduces_records() {
    let fixture = engine_fixture(EngineConfig::default());
    for text in [
        "Renewed the library card.",
        "Ordered a replacement charger.",
    ] {
        store_settled(&fixture, "u1", text).await.unwrap();
    }

    let stream = fixture.engine.export_memories("u1", None).await.unwrap();
    let records = relevance_core::export::Exporter::parse(&stream).unwrap();
    assert_eq!(records.len(), 2);

    // Rebuild memories on a fresh store from the exported records; the
    // fresh export is bit-identical.
    let fresh = engine_fixture(EngineConfig::default());
    for record in &records {
        let mut memory = Memory::new(
            record.user_id.clone(),
            record.text.clone(),
            relevance_core::fingerprint::fingerprint(&record.text),
            record.created_at,
        );
        memory.id = record.id;
        memory.features = record.features.clone();
        memory.salience = record.salience.clone();
        memory.tier = record.tier;
        memory.state = record.state;
        memory.embedding_ref = record.embedding_ref.clone();
        memory.tags = record.tags.clone();
        fresh.store.put_memory(&memory).await.unwrap();
    }
    let second_stream = fresh.engine.export_memories("u1", None).await.unwrap();
    assert_eq!(stream, second_stream);
}

#[tokio::test]
async fn empty_vote_session_leaves_state_unchanged() {
    let fixture = engine_fixture(EngineConfig::default());
    store_settled(&fixture, "u1", "Sprint planning outline.")
        .await
        .unwrap();

    let before = fixture.store.list_memories("u1").await.unwrap();
    let (session, _) = fixture
        .engine
        .recall_session_start("u1", "planning", 5)
        .await
        .unwrap();
    fixture
        .engine
        .recall_vote("u1", session.id, std::collections::HashMap::new(), 5)
        .await
        .unwrap();
    fixture
        .engine
        .recall_resolve("u1", session.id)
        .await
        .unwrap();

    let after = fixture.store.list_memories("u1").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn deleted_memories_never_reachable_via_any_read_path() {
    let fixture = engine_fixture(EngineConfig::default());
    let memory_id = store_settled(&fixture, "u1", "Security question answers.")
        .await
        .unwrap();
    fixture
        .engine
        .forget("u1", memory_id, ForgetMode::Delete)
        .await
        .unwrap();

    let recall = fixture
        .engine
        .recall("u1", None, RecallFilters::default(), 10, true)
        .await
        .unwrap();
    assert!(recall.items.is_empty());

    let relevant = fixture.engine.whats_relevant("u1").await.unwrap();
    assert!(relevant.items.is_empty());

    let export = fixture.engine.export_memories("u1", None).await.unwrap();
    assert!(export.is_empty());
}

#[tokio::test]
async fn cross_user_isolation() {
    let fixture = engine_fixture(EngineConfig::default());
    store_settled(&fixture, "alice", "Alice's private planning note.")
        .await
        .unwrap();
    store_settled(&fixture, "bob", "Bob's grocery run.").await.unwrap();

    let outcome = fixture
        .engine
        .recall("bob", Some("planning note"), RecallFilters::default(), 10, false)
        .await
        .unwrap();
    assert!(outcome.items.iter().all(|i| i.memory.user_id == "bob"));
}
