//! # Relationship Updater
//!
//! Folds each ingested memory into the relationship graph: first-person
//! edges from the user's persona to every mentioned person, and co-mention
//! edges between persons mentioned together. Updated exclusively by the
//! ingest pipeline.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::constants::{TREND_WINDOW, VALENCE_EMA_ALPHA};
use crate::entities::EntityResolver;
use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{EntityKind, Memory, Relationship, RelationshipTrend};

/// Minimum samples before a trend other than `Stable` is reported.
const TREND_MIN_SAMPLES: usize = 4;

/// Dead zone around zero drift that still counts as `Stable`.
const TREND_EPSILON: f32 = 0.1;

/// Recompute the sentiment trend from the recent valence window: the mean
/// of the newer half is compared against the mean of the older half.
#[must_use]
pub fn trend_of(recent_valence: &[f32]) -> RelationshipTrend {
    if recent_valence.len() < TREND_MIN_SAMPLES {
        return RelationshipTrend::Stable;
    }
    let mid = recent_valence.len() / 2;
    let older: f32 = recent_valence[..mid].iter().sum::<f32>() / mid as f32;
    let newer: f32 =
        recent_valence[mid..].iter().sum::<f32>() / (recent_valence.len() - mid) as f32;
    let drift = newer - older;
    if drift > TREND_EPSILON {
        RelationshipTrend::Improving
    } else if drift < -TREND_EPSILON {
        RelationshipTrend::Declining
    } else {
        RelationshipTrend::Stable
    }
}

/// Relationship updater over the document store.
pub struct RelationshipUpdater {
    store: Arc<dyn DocumentStore>,
    resolver: EntityResolver,
}

impl RelationshipUpdater {
    /// Create an updater.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, resolver: EntityResolver) -> Self {
        Self { store, resolver }
    }

    /// Apply a memory to the relationship graph. Returns the entity ids of
    /// the persons involved, for attachment to the memory record.
    pub async fn apply(&self, memory: &Memory, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        if memory.features.people.is_empty() {
            return Ok(Vec::new());
        }

        let user_id = &memory.user_id;
        let self_entity = self.resolver.self_entity(user_id, now).await?;

        let mut person_ids = Vec::new();
        for person in &memory.features.people {
            let entity = self
                .resolver
                .resolve(user_id, &person.surface, EntityKind::Person, now)
                .await?;
            self.touch_edge(user_id, self_entity.id, entity.id, memory, now)
                .await?;
            person_ids.push(entity.id);
        }

        // Co-mention edges, both directions.
        for (index, source) in person_ids.iter().enumerate() {
            for target in person_ids.iter().skip(index + 1) {
                self.touch_edge(user_id, *source, *target, memory, now).await?;
                self.touch_edge(user_id, *target, *source, memory, now).await?;
            }
        }

        Ok(person_ids)
    }

    async fn touch_edge(
        &self,
        user_id: &str,
        source_id: Uuid,
        target_id: Uuid,
        memory: &Memory,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let valence = memory.features.valence;
        let mut edge = self
            .store
            .get_relationship(user_id, source_id, target_id)
            .await?
            .unwrap_or(Relationship {
                user_id: user_id.to_string(),
                source_id,
                target_id,
                interaction_count: 0,
                last_interaction_at: now,
                valence_mean: valence,
                recent_valence: Vec::new(),
                trend: RelationshipTrend::Stable,
                sensitivities: Vec::new(),
            });

        edge.interaction_count += 1;
        edge.last_interaction_at = now;
        edge.valence_mean = VALENCE_EMA_ALPHA
            .mul_add(valence, (1.0 - VALENCE_EMA_ALPHA) * edge.valence_mean);
        edge.recent_valence.push(valence);
        if edge.recent_valence.len() > TREND_WINDOW {
            let excess = edge.recent_valence.len() - TREND_WINDOW;
            edge.recent_valence.drain(..excess);
        }
        edge.trend = trend_of(&edge.recent_valence);

        // Sensitivities are additive; topics are never removed here.
        for topic in &memory.features.sensitive_topics {
            if !edge.sensitivities.contains(topic) {
                edge.sensitivities.push(topic.clone());
            }
        }

        debug!(
            user_id,
            %source_id,
            %target_id,
            valence_mean = edge.valence_mean,
            trend = ?edge.trend,
            "relationship edge updated"
        );
        self.store.put_relationship(&edge).await
    }
}
