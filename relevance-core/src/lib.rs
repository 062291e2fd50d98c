#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

//! # Relevance Core
//!
//! A context-aware memory engine for AI agents: ingest unstructured
//! events, score their salience, extract commitments and relationships,
//! place them in a hot/warm/cold tier hierarchy, and retrieve what
//! matters *now* through context-gated ranking with anticipatory prefetch
//! from learned temporal patterns.
//!
//! ## Core Concepts
//!
//! - **Memory**: the canonical record, owned by one user, scored 0-100
//!   for salience at ingest time
//! - **Open loop**: an unresolved commitment owed by or to the user
//! - **Context frame**: a rolling snapshot of the user's situation that
//!   biases retrieval through a multiplicative gate
//! - **Tier**: hot (in-memory, TTL'd), warm (document store), cold
//!   (object storage), with access-driven promotion and periodic demotion
//! - **Pattern**: a detected daily/weekly/monthly periodicity in the
//!   user's access behavior, driving prefetch
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`engine`]: the [`RelevanceEngine`](engine::RelevanceEngine) facade
//! - [`ingest`]: the write path and side-effect dispatcher
//! - [`retrieval`]: fusion ranking and the context gate
//! - [`session`]: iterative "on second thought" recall
//!
//! ### Support Modules
//! - [`types`]: the data model
//! - [`storage`]: store traits and in-memory implementations
//! - [`tier`]: promotion/demotion and the frequency tracker
//! - [`temporal`]: pattern detection and prefetch
//! - [`extraction`] / [`salience`]: features and scoring
//!
//! ## Quick Start
//!
//! ```no_run
//! use relevance_core::engine::RelevanceEngine;
//! use relevance_core::config::EngineConfig;
//! use relevance_core::ingest::IngestHints;
//! use relevance_core::retrieval::RecallFilters;
//!
//! #[tokio::main]
//! async fn main() -> relevance_core::Result<()> {
//!     let engine = RelevanceEngine::in_memory(EngineConfig::default());
//!
//!     let receipt = engine
//!         .store_memory("user-1", "laptop", "I'll send Sarah the budget by Friday.", IngestHints::default())
//!         .await?;
//!     println!("stored {} with salience {:.0}", receipt.memory_id, receipt.salience);
//!
//!     let results = engine
//!         .recall("user-1", Some("budget"), RecallFilters::default(), 5, false)
//!         .await?;
//!     for item in results.items {
//!         println!("{:.3}  {}", item.score, item.memory.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod entities;
pub mod error;
pub mod export;
pub mod extraction;
pub mod fingerprint;
pub mod ingest;
pub mod lexicon;
pub mod loops;
pub mod notify;
pub mod relationships;
pub mod retrieval;
pub mod salience;
pub mod session;
pub mod storage;
pub mod temporal;
pub mod tier;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, LanguageBackendKind};
pub use engine::{
    Briefing, EngineDeps, ForgetMode, LoopFilter, RelevanceEngine, RelevantSummary, WorkerHandles,
};
pub use error::{Error, Result};
pub use extraction::{BackendError, EntityHint, FeatureExtractor, LanguageBackend};
pub use ingest::{IngestHints, IngestReceipt, SideEffect, SideEffectDispatcher};
pub use retrieval::{RecallFilters, RetrievalOutcome, RetrievalPipeline, RetrievedMemory};
pub use salience::{AmbientSignals, SalienceCalculator, SalienceWeights};
pub use session::{RecallSessionManager, SparkBranch, VoteOutcome};
pub use storage::{DocumentStore, HotCache, ObjectStore, VectorIndex, VectorMatch};
pub use temporal::{AnticipateDecision, PatternDetector, Prefetcher};
pub use tier::{FrequencyTracker, TierManager};
pub use types::{
    AccessLogEntry, ContextFrame, ContextSnapshot, Entity, EntityKind, ExportRecord, Features,
    LifecycleState, LoopKind, LoopState, Memory, MemoryCategory, OpenLoop, PeriodicSlot,
    RecallSession, Relationship, RelationshipTrend, SalienceScore, TemporalPattern, Tier, Vote,
};
