//! # Context Frame Store
//!
//! Rolling "where / who / what / project" record per user. At most one
//! active frame exists per user at any instant; transitions are
//! serialized, expiry is enforced on every read, and prior frames are kept
//! as bounded history.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::{CONTEXT_FRAME_HISTORY, CONTEXT_FRAME_TTL_SECS};
use crate::entities::EntityResolver;
use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{ContextFrame, EntityKind};

/// Caller-supplied frame fields for `set_context`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameFields {
    /// Where the user is.
    pub location: Option<String>,
    /// Who is present, as surface names.
    pub people: Vec<String>,
    /// What the user is doing.
    pub activity: Option<String>,
    /// Project in focus.
    pub project: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

/// Context frame store over the document store.
pub struct ContextFrameStore {
    store: Arc<dyn DocumentStore>,
    resolver: EntityResolver,
    // Serializes frame transitions per the ordering guarantees; frame
    // changes are rare enough that one lock for all users suffices.
    transitions: Mutex<()>,
}

impl ContextFrameStore {
    /// Create a frame store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, resolver: EntityResolver) -> Self {
        Self {
            store,
            resolver,
            transitions: Mutex::new(()),
        }
    }

    /// Start a new frame, closing any prior active frame.
    pub async fn set_context(
        &self,
        user_id: &str,
        fields: FrameFields,
        now: DateTime<Utc>,
    ) -> Result<ContextFrame> {
        let _guard = self.transitions.lock().await;

        if let Some(mut previous) = self.store.get_active_frame(user_id).await? {
            previous.active = false;
            self.store.put_frame(&previous).await?;
            debug!(user_id, frame_id = %previous.id, "previous frame moved to history");
        }

        let mut people = Vec::new();
        for surface in &fields.people {
            let entity = self
                .resolver
                .resolve(user_id, surface, EntityKind::Person, now)
                .await?;
            people.push(entity.id);
        }

        let frame = ContextFrame {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            location: fields.location,
            people,
            activity: fields.activity,
            project: fields.project,
            tags: fields.tags,
            started_at: now,
            expires_at: now + Duration::seconds(CONTEXT_FRAME_TTL_SECS as i64),
            active: true,
        };
        self.store.put_frame(&frame).await?;
        self.store.prune_frames(user_id, CONTEXT_FRAME_HISTORY).await?;
        info!(user_id, frame_id = %frame.id, "context frame started");
        Ok(frame)
    }

    /// The active frame, with expiry enforced and the sliding TTL
    /// refreshed on read.
    pub async fn active_frame(&self, user_id: &str, now: DateTime<Utc>) -> Result<Option<ContextFrame>> {
        let Some(mut frame) = self.store.get_active_frame(user_id).await? else {
            return Ok(None);
        };
        if frame.expires_at <= now {
            let _guard = self.transitions.lock().await;
            frame.active = false;
            self.store.put_frame(&frame).await?;
            debug!(user_id, frame_id = %frame.id, "active frame expired");
            return Ok(None);
        }
        frame.expires_at = now + Duration::seconds(CONTEXT_FRAME_TTL_SECS as i64);
        self.store.put_frame(&frame).await?;
        Ok(Some(frame))
    }

    /// Move the active frame to history. Returns the closed frame id.
    pub async fn clear_context(&self, user_id: &str) -> Result<Option<Uuid>> {
        let _guard = self.transitions.lock().await;
        let Some(mut frame) = self.store.get_active_frame(user_id).await? else {
            return Ok(None);
        };
        frame.active = false;
        self.store.put_frame(&frame).await?;
        info!(user_id, frame_id = %frame.id, "context frame cleared");
        Ok(Some(frame.id))
    }
}
