//! # Test Utilities
//!
//! Shared fixtures for the relevance engine workspace.
//!
//! Provides:
//! - An engine handle wired over in-memory fakes
//! - A scriptable language backend (canned features, failure injection)
//! - Seeding helpers for memories and access-log histories

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use relevance_core::config::EngineConfig;
use relevance_core::embeddings::HashedBagEmbedder;
use relevance_core::engine::{EngineDeps, RelevanceEngine};
use relevance_core::extraction::{BackendError, EntityHint, LanguageBackend};
use relevance_core::ingest::IngestHints;
use relevance_core::storage::memory::{
    InMemoryDocumentStore, InMemoryHotCache, InMemoryObjectStore, InMemoryVectorIndex,
};
use relevance_core::types::{AccessLogEntry, Features};
use relevance_core::DocumentStore;
use uuid::Uuid;

/// Engine plus handles on its in-memory stores for direct inspection.
pub struct EngineFixture {
    /// The engine under test.
    pub engine: Arc<RelevanceEngine>,
    /// The backing document store.
    pub store: Arc<InMemoryDocumentStore>,
    /// The backing vector index.
    pub index: Arc<InMemoryVectorIndex>,
    /// The backing hot cache.
    pub hot: Arc<InMemoryHotCache>,
}

/// Build an engine over in-memory fakes with the given config.
#[must_use]
pub fn engine_fixture(config: EngineConfig) -> EngineFixture {
    engine_with_backend(config, None)
}

/// Build an engine with a language backend installed.
#[must_use]
pub fn engine_with_backend(
    config: EngineConfig,
    language: Option<Arc<dyn LanguageBackend>>,
) -> EngineFixture {
    let store = Arc::new(InMemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new());
    let hot = Arc::new(InMemoryHotCache::new());
    let engine = RelevanceEngine::new(
        config,
        EngineDeps {
            document: store.clone(),
            vector: index.clone(),
            hot: hot.clone(),
            cold: Arc::new(InMemoryObjectStore::new()),
            embedder: Arc::new(HashedBagEmbedder::new()),
            language,
        },
    );
    EngineFixture {
        engine,
        store,
        index,
        hot,
    }
}

/// Ingest a memory and wait for its side effects to settle.
pub async fn store_settled(
    fixture: &EngineFixture,
    user_id: &str,
    text: &str,
) -> relevance_core::Result<Uuid> {
    let receipt = fixture
        .engine
        .store_memory(user_id, "test-device", text, IngestHints::default())
        .await?;
    fixture.engine.wait_idle().await;
    Ok(receipt.memory_id)
}

/// Ingest at an explicit time and wait for side effects.
pub async fn store_settled_at(
    fixture: &EngineFixture,
    user_id: &str,
    text: &str,
    at: DateTime<Utc>,
) -> relevance_core::Result<Uuid> {
    let receipt = fixture
        .engine
        .store_memory_at(user_id, "test-device", text, IngestHints::default(), at)
        .await?;
    fixture.engine.wait_idle().await;
    Ok(receipt.memory_id)
}

/// Seed `days` of daily access-log hits at `hour` (UTC), newest ending
/// just before `now`, optionally attributed to a memory.
pub async fn seed_daily_accesses(
    store: &InMemoryDocumentStore,
    user_id: &str,
    memory_id: Option<Uuid>,
    days: u32,
    hour: u32,
    now: DateTime<Utc>,
) {
    for day in 1..=i64::from(days) {
        let at = (now - Duration::days(day))
            .date_naive()
            .and_hms_opt(hour, 5, 0)
            .map(|naive| naive.and_utc());
        if let Some(at) = at {
            let entry = AccessLogEntry {
                user_id: user_id.to_string(),
                memory_id,
                at,
            };
            if store.append_access(&entry).await.is_err() {
                unreachable!("in-memory append cannot fail");
            }
        }
    }
}

/// A scriptable language backend: canned features per text, optional
/// failure injection, call counting.
pub struct ScriptedBackend {
    responses: Mutex<HashMap<String, Features>>,
    fail_all: Mutex<bool>,
    calls: Mutex<u32>,
}

impl ScriptedBackend {
    /// New backend with no canned responses; unknown text returns
    /// default features.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fail_all: Mutex::new(false),
            calls: Mutex::new(0),
        }
    }

    /// Can a response for an exact text.
    pub fn respond(&self, text: &str, features: Features) {
        self.responses.lock().insert(text.to_string(), features);
    }

    /// Make every call fail until cleared, to exercise degraded mode.
    pub fn set_failing(&self, failing: bool) {
        *self.fail_all.lock() = failing;
    }

    /// Number of extraction calls received.
    #[must_use]
    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageBackend for ScriptedBackend {
    async fn extract(
        &self,
        text: &str,
        _prior_entities: &[EntityHint],
    ) -> Result<Features, BackendError> {
        *self.calls.lock() += 1;
        if *self.fail_all.lock() {
            return Err(BackendError::Unavailable("scripted failure".into()));
        }
        Ok(self.responses.lock().get(text).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
