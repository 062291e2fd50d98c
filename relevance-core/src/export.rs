//! # Export
//!
//! Canonical NDJSON export of a user's memories: one [`ExportRecord`] per
//! line, bit-exact across engine versions for any same-input corpus.
//! Deleted memories are excluded; everything else ships with its loops.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{ExportRecord, LifecycleState, OpenLoop};

/// Memory exporter over the document store.
pub struct Exporter {
    store: Arc<dyn DocumentStore>,
}

impl Exporter {
    /// Create an exporter.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Export all non-deleted memories created at or after `since`
    /// (everything when `None`), as NDJSON, oldest first. Id breaks the
    /// tie on equal timestamps, keeping the stream deterministic.
    pub async fn export(&self, user_id: &str, since: Option<DateTime<Utc>>) -> Result<String> {
        let loops = self.store.list_loops(user_id).await?;
        let mut memories = self.store.list_memories(user_id).await?;
        memories.retain(|m| m.state != LifecycleState::Deleted);
        if let Some(since) = since {
            memories.retain(|m| m.created_at >= since);
        }
        memories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut out = String::new();
        for memory in memories {
            let mut loop_ids: Vec<_> = loops
                .iter()
                .filter(|l| l.memory_id == memory.id)
                .map(|l: &OpenLoop| l.id)
                .collect();
            loop_ids.sort();
            let record = ExportRecord {
                id: memory.id,
                user_id: memory.user_id,
                created_at: memory.created_at,
                text: memory.text,
                features: memory.features,
                salience: memory.salience,
                tier: memory.tier,
                state: memory.state,
                embedding_ref: memory.embedding_ref,
                tags: memory.tags,
                loops: loop_ids,
            };
            out.push_str(&serde_json::to_string(&record)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Parse an exported stream back into records.
    pub fn parse(stream: &str) -> Result<Vec<ExportRecord>> {
        stream
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}
