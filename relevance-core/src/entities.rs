//! Entity resolution.
//!
//! Entities are created on first mention and retained for continuity even
//! when the last mention is removed. Surface forms resolve first by exact
//! (case-insensitive) name, then by fuzzy match against known entities of
//! the same kind.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{Entity, EntityKind};

/// Minimum Jaro-Winkler similarity for a fuzzy surface-form match.
const FUZZY_MATCH_THRESHOLD: f64 = 0.88;

/// Name of the per-user persona entity, source of first-person edges.
const SELF_ENTITY_NAME: &str = "self";

/// Resolves surface forms to entities, creating them on first mention.
pub struct EntityResolver {
    store: Arc<dyn DocumentStore>,
}

impl EntityResolver {
    /// Create a resolver over the document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Resolve a surface form to an entity of `kind`, creating a new one
    /// when nothing matches. Updates `last_mentioned_at` on a match.
    pub async fn resolve(
        &self,
        user_id: &str,
        surface: &str,
        kind: EntityKind,
        now: DateTime<Utc>,
    ) -> Result<Entity> {
        let surface = surface.trim();

        if let Some(mut entity) = self.store.find_entity_by_name(user_id, surface).await? {
            entity.last_mentioned_at = now;
            self.store.put_entity(&entity).await?;
            return Ok(entity);
        }

        // Fuzzy pass over same-kind entities ("Mike" vs "Mike R.").
        let lower = surface.to_lowercase();
        let candidates = self.store.list_entities(user_id).await?;
        let best = candidates
            .into_iter()
            .filter(|entity| entity.kind == kind && !entity.is_self)
            .map(|entity| {
                let similarity = strsim::jaro_winkler(&entity.name.to_lowercase(), &lower);
                (entity, similarity)
            })
            .filter(|(_, similarity)| *similarity >= FUZZY_MATCH_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((mut entity, similarity)) = best {
            debug!(user_id, surface, entity = %entity.name, similarity, "fuzzy entity match");
            entity.last_mentioned_at = now;
            self.store.put_entity(&entity).await?;
            return Ok(entity);
        }

        let entity = Entity::new(user_id.to_string(), kind, surface.to_string(), now);
        self.store.put_entity(&entity).await?;
        debug!(user_id, surface, id = %entity.id, "entity created on first mention");
        Ok(entity)
    }

    /// The user's persona entity, created lazily. First-person
    /// relationship edges originate here.
    pub async fn self_entity(&self, user_id: &str, now: DateTime<Utc>) -> Result<Entity> {
        if let Some(entity) = self.store.find_entity_by_name(user_id, SELF_ENTITY_NAME).await? {
            return Ok(entity);
        }
        let mut entity = Entity::new(
            user_id.to_string(),
            EntityKind::Person,
            SELF_ENTITY_NAME.to_string(),
            now,
        );
        entity.is_self = true;
        self.store.put_entity(&entity).await?;
        Ok(entity)
    }

    /// Fetch an entity by id.
    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<Entity>> {
        self.store.get_entity(user_id, id).await
    }
}
