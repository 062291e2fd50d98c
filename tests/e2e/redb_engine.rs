//! The full engine over the redb document store.

use std::sync::Arc;

use relevance_core::config::EngineConfig;
use relevance_core::embeddings::HashedBagEmbedder;
use relevance_core::engine::{EngineDeps, LoopFilter, RelevanceEngine};
use relevance_core::ingest::IngestHints;
use relevance_core::retrieval::RecallFilters;
use relevance_core::storage::memory::{InMemoryHotCache, InMemoryVectorIndex};
use relevance_core::types::LoopState;
use relevance_storage_redb::{RedbDocumentStore, RedbObjectStore};

fn redb_engine(dir: &tempfile::TempDir) -> Arc<RelevanceEngine> {
    let documents = RedbDocumentStore::open(&dir.path().join("engine.redb")).unwrap();
    let objects = RedbObjectStore::with_database(documents.database()).unwrap();
    RelevanceEngine::new(
        EngineConfig::default(),
        EngineDeps {
            document: Arc::new(documents),
            vector: Arc::new(InMemoryVectorIndex::new()),
            hot: Arc::new(InMemoryHotCache::new()),
            cold: Arc::new(objects),
            embedder: Arc::new(HashedBagEmbedder::new()),
            language: None,
        },
    )
}

#[tokio::test]
async fn ingest_recall_and_loops_on_redb() {
    let dir = tempfile::tempdir().unwrap();
    let engine = redb_engine(&dir);

    let receipt = engine
        .store_memory(
            "u1",
            "laptop",
            "I'll send Sarah the budget by Friday.",
            IngestHints::default(),
        )
        .await
        .unwrap();
    engine.wait_idle().await;

    let outcome = engine
        .recall("u1", Some("budget"), RecallFilters::default(), 5, false)
        .await
        .unwrap();
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].memory.id, receipt.memory_id);

    let loops = engine.list_loops("u1", LoopFilter::default()).await.unwrap();
    assert_eq!(loops.len(), 1);
    assert_eq!(loops[0].state, LoopState::Open);

    engine.close_loop("u1", loops[0].id).await.unwrap();
    let closed = engine
        .list_loops(
            "u1",
            LoopFilter {
                state: Some(LoopState::Done),
                counterparty: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
}

#[tokio::test]
async fn memories_survive_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let memory_id = {
        let engine = redb_engine(&dir);
        let receipt = engine
            .store_memory("u1", "laptop", "Durable fact about the boiler.", IngestHints::default())
            .await
            .unwrap();
        engine.wait_idle().await;
        receipt.memory_id
    };

    // The dispatcher task releases its store handle when the engine's
    // channel closes; give it a beat before reopening the file.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    // A new engine over the same file sees the memory; the vector index
    // projection is empty but the empty-query path reads the document
    // store directly.
    let engine = redb_engine(&dir);
    let outcome = engine
        .recall("u1", None, RecallFilters::default(), 5, false)
        .await
        .unwrap();
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].memory.id, memory_id);
}
