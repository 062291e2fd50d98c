//! End-to-end scenarios over an engine wired with in-memory fakes.

use chrono::{Datelike, Duration, Utc, Weekday};
use std::collections::HashMap;
use std::sync::Arc;

use relevance_core::config::EngineConfig;
use relevance_core::context::FrameFields;
use relevance_core::engine::LoopFilter;
use relevance_core::ingest::IngestHints;
use relevance_core::retrieval::RecallFilters;
use relevance_core::storage::memory::InMemoryObjectStore;
use relevance_core::temporal::Prefetcher;
use relevance_core::tier::TierManager;
use relevance_core::types::{LoopKind, LoopState, MemoryCategory, Vote};
use relevance_core::VectorIndex;
use relevance_core::DocumentStore;
use test_utils::{engine_fixture, seed_daily_accesses, store_settled};

/// Scenario 1: commitment extraction and implicit completion.
#[tokio::test]
async fn commitment_extraction_and_completion() {
    let fixture = engine_fixture(EngineConfig::default());
    let engine = &fixture.engine;

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

    let memory = fixture
        .store
        .get_memory("u1", receipt.memory_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(memory.features.category, MemoryCategory::Commitment);

    let loops = engine.list_loops("u1", LoopFilter::default()).await.unwrap();
    assert_eq!(loops.len(), 1);
    let open_loop = &loops[0];
    assert_eq!(open_loop.kind, LoopKind::YouOweThem);
    assert_eq!(open_loop.state, LoopState::Open);

    let counterparty = fixture
        .store
        .get_entity("u1", open_loop.counterparty_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counterparty.name, "Sarah");

    // Due date is the coming Friday, end of day.
    let due = open_loop.due_at.unwrap();
    assert_eq!(due.date_naive().weekday(), Weekday::Fri);
    assert!(due > Utc::now());
    assert!(due <= Utc::now() + Duration::days(7));

    // A later assertion of completion closes the loop.
    engine
        .store_memory("u1", "laptop", "Sent Sarah the budget.", IngestHints::default())
        .await
        .unwrap();
    engine.wait_idle().await;

    let loops = engine.list_loops("u1", LoopFilter::default()).await.unwrap();
    assert_eq!(loops[0].state, LoopState::Done);
}

/// Scenario 2: two identical ingests within the window are one memory.
#[tokio::test]
async fn dedup_within_window() {
    let fixture = engine_fixture(EngineConfig::default());
    let engine = &fixture.engine;

    let first = engine
        .store_memory(
            "u1",
            "laptop",
            "Team standup at 9 moved to 9:30.",
            IngestHints::default(),
        )
        .await
        .unwrap();
    let second = engine
        .store_memory(
            "u1",
            "phone",
            "Team standup at 9 moved to 9:30.",
            IngestHints::default(),
        )
        .await
        .unwrap();

    assert_eq!(first.memory_id, second.memory_id);
    assert!(!first.deduplicated);
    assert!(second.deduplicated);

    engine.wait_idle().await;
    assert_eq!(fixture.store.list_memories("u1").await.unwrap().len(), 1);
}

/// Scenario 3: context-aware retrieval prefers the in-context project.
#[tokio::test]
async fn context_aware_retrieval() {
    let fixture = engine_fixture(EngineConfig::default());
    let engine = &fixture.engine;

    // Stored before any context: no project tag.
    let avatar = store_settled(&fixture, "u1", "Refactor the avatar upload module.")
        .await
        .unwrap();

    engine
        .set_context(
            "u1",
            FrameFields {
                location: Some("vscode".into()),
                project: Some("payments".into()),
                ..FrameFields::default()
            },
        )
        .await
        .unwrap();

    // Stored inside the frame: tagged with the active project.
    let payments = store_settled(&fixture, "u1", "Refactor the payments checkout flow.")
        .await
        .unwrap();
    let stored = fixture
        .store
        .get_memory("u1", payments)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.tags.contains(&"payments".to_string()));

    let outcome = engine
        .recall("u1", Some("refactor"), RecallFilters::default(), 5, false)
        .await
        .unwrap();
    assert_eq!(outcome.items.len(), 2, "both pass the gate threshold");
    assert_eq!(outcome.items[0].memory.id, payments);
    assert_eq!(outcome.items[1].memory.id, avatar);
}

/// Scenario 4: a bereavement outscores a logistics note by 25+ points.
#[tokio::test]
async fn salience_ranking_margin() {
    let fixture = engine_fixture(EngineConfig::default());
    let engine = &fixture.engine;

    let logistics = engine
        .store_memory("u1", "laptop", "Meeting moved to 3pm.", IngestHints::default())
        .await
        .unwrap();
    let bereavement = engine
        .store_memory(
            "u1",
            "laptop",
            "Sarah's father passed away.",
            IngestHints::default(),
        )
        .await
        .unwrap();

    assert!(
        bereavement.salience - logistics.salience >= 25.0,
        "expected a 25+ point margin, got {} vs {}",
        bereavement.salience,
        logistics.salience
    );
}

/// Scenario 5: 30 days of 09:00 hits yield a daily pattern and a
/// morning prefetch.
#[tokio::test]
async fn temporal_prediction_and_prefetch() {
    let fixture = engine_fixture(EngineConfig::default());
    let engine = &fixture.engine;
    let now = Utc::now();

    let morning = store_settled(&fixture, "u1", "Standup agenda for the platform team.")
        .await
        .unwrap();
    store_settled(&fixture, "u1", "Dinner reservation for Saturday.")
        .await
        .unwrap();

    // Drop the ingest-time access entries so the seeded 09:00 habit is
    // the only signal in the log.
    fixture
        .store
        .prune_access("u1", now + Duration::minutes(1))
        .await
        .unwrap();
    seed_daily_accesses(&fixture.store, "u1", Some(morning), 30, 9, now).await;

    let pattern = engine.get_predictions("u1").await.unwrap();
    let daily = pattern.daily.expect("daily slot detected");
    assert_eq!(daily.period_hours, 24);
    assert!(daily.confidence >= 0.3);
    assert_eq!(daily.peak_offsets.first(), Some(&9));
    assert!(pattern.initial);

    // Anticipate at 08:50 with a 15-minute look-ahead.
    let eight_fifty = now
        .date_naive()
        .and_hms_opt(8, 50, 0)
        .unwrap()
        .and_utc();
    let prefetcher = Prefetcher::new(
        fixture.store.clone(),
        Arc::new(TierManager::new(
            &EngineConfig::default(),
            fixture.store.clone(),
            fixture.hot.clone(),
            Arc::new(InMemoryObjectStore::new()),
        )),
    );
    let decision = prefetcher
        .anticipate("u1", Duration::minutes(15), eight_fifty)
        .await
        .unwrap();

    assert!(decision.triggered);
    assert_eq!(decision.peak_offset, Some(9));
    assert_eq!(decision.memory_ids.first(), Some(&morning));
    assert!(decision.memory_ids.len() <= 5);
}

/// Scenario 6: recall session voting refines toward hot and drops cold.
#[tokio::test]
async fn recall_session_refinement() {
    let fixture = engine_fixture(EngineConfig::default());
    let engine = &fixture.engine;

    for text in [
        "Project deadline planning for the q4 launch.",
        "Tax filing deadline paperwork.",
        "Launch planning checklist for q4 marketing.",
        "Project retrospective notes from the sprint.",
        "Deadline extension email thread with legal.",
    ] {
        store_settled(&fixture, "u1", text).await.unwrap();
    }

    let (session, candidates) = engine
        .recall_session_start("u1", "project deadlines", 5)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 5);

    let hot = candidates
        .iter()
        .find(|c| c.memory.text.contains("q4 launch"))
        .unwrap()
        .memory
        .id;
    let cold = candidates
        .iter()
        .find(|c| c.memory.text.contains("Tax filing"))
        .unwrap()
        .memory
        .id;
    let warm = candidates
        .iter()
        .find(|c| c.memory.text.contains("q4 marketing"))
        .unwrap()
        .memory
        .id;

    let mut votes = HashMap::new();
    votes.insert(hot, Vote::Hot);
    votes.insert(cold, Vote::Cold);
    votes.insert(warm, Vote::Warm);
    let outcome = engine
        .recall_vote("u1", session.id, votes, 5)
        .await
        .unwrap();

    // The cold candidate never reappears.
    assert!(outcome.candidates.iter().all(|c| c.memory.id != cold));

    // The refined top result sits closer to the hot vote than to the cold.
    let top = outcome.candidates.first().unwrap().memory.id;
    let top_vec = fixture.index.get("u1", top).await.unwrap().unwrap();
    let hot_vec = fixture.index.get("u1", hot).await.unwrap().unwrap();
    let cold_vec = fixture.index.get("u1", cold).await.unwrap().unwrap();
    let to_hot = relevance_core::embeddings::cosine_similarity(&top_vec, &hot_vec);
    let to_cold = relevance_core::embeddings::cosine_similarity(&top_vec, &cold_vec);
    assert!(to_hot > to_cold, "top should lean toward the hot vote");

    engine.recall_resolve("u1", session.id).await.unwrap();
}
