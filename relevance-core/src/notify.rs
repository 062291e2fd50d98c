//! Care-circle pressure checks.
//!
//! When the rolling valence of a care-circle member's relationship drops
//! below their floor, the core writes a pending notification record;
//! delivery itself is external. A cooldown keeps one low period from
//! producing a stream of triggers.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::entities::EntityResolver;
use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{NotificationRecord, NotificationStatus};

/// Valence floor used when a care-circle member has no explicit prefs.
const DEFAULT_VALENCE_FLOOR: f32 = -0.4;

/// Care-circle pressure checker.
pub struct CarePressureChecker {
    store: Arc<dyn DocumentStore>,
    resolver: EntityResolver,
    cooldown: Duration,
}

impl CarePressureChecker {
    /// Create a checker with the configured notification cooldown.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, resolver: EntityResolver, cooldown_seconds: u64) -> Self {
        Self {
            store,
            resolver,
            cooldown: Duration::seconds(cooldown_seconds as i64),
        }
    }

    /// Scan a user's care circle and write pending notification records
    /// for members whose rolling valence is under their floor. Returns the
    /// entity ids that triggered.
    pub async fn check(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let self_entity = self.resolver.self_entity(user_id, now).await?;
        let edges = self
            .store
            .list_relationships_from(user_id, self_entity.id)
            .await?;

        let mut triggered = Vec::new();
        for edge in edges {
            let Some(entity) = self.store.get_entity(user_id, edge.target_id).await? else {
                continue;
            };
            if !entity.care_circle {
                continue;
            }
            let floor = entity
                .notify_prefs
                .as_ref()
                .map_or(DEFAULT_VALENCE_FLOOR, |prefs| prefs.valence_floor);
            if edge.valence_mean >= floor {
                continue;
            }

            // Cooldown: at most one trigger per entity per window.
            let recent = self.store.list_notifications(user_id, entity.id).await?;
            if recent
                .first()
                .is_some_and(|last| now - last.created_at < self.cooldown)
            {
                continue;
            }

            let record = NotificationRecord {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                entity_id: entity.id,
                reason: format!(
                    "rolling valence {:.2} below floor {:.2} for {}",
                    edge.valence_mean, floor, entity.name
                ),
                status: NotificationStatus::Pending,
                created_at: now,
            };
            self.store.append_notification(&record).await?;
            info!(user_id, entity = %entity.name, "care pressure notification triggered");
            triggered.push(entity.id);
        }
        Ok(triggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryDocumentStore;
    use crate::types::{EntityKind, Relationship, RelationshipTrend};

    async fn fixture(valence: f32) -> (CarePressureChecker, Arc<InMemoryDocumentStore>, Uuid) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let resolver = EntityResolver::new(store.clone());
        let now = Utc::now();

        let self_entity = resolver.self_entity("u1", now).await.unwrap();
        let mut mom = resolver
            .resolve("u1", "Mom", EntityKind::Person, now)
            .await
            .unwrap();
        mom.care_circle = true;
        store.put_entity(&mom).await.unwrap();

        store
            .put_relationship(&Relationship {
                user_id: "u1".into(),
                source_id: self_entity.id,
                target_id: mom.id,
                interaction_count: 8,
                last_interaction_at: now,
                valence_mean: valence,
                recent_valence: vec![valence],
                trend: RelationshipTrend::Declining,
                sensitivities: vec![],
            })
            .await
            .unwrap();

        let checker = CarePressureChecker::new(store.clone(), EntityResolver::new(store.clone()), 14_400);
        (checker, store, mom.id)
    }

    #[tokio::test]
    async fn low_valence_triggers_pending_notification() {
        let (checker, store, mom_id) = fixture(-0.7).await;
        let triggered = checker.check("u1", Utc::now()).await.unwrap();
        assert_eq!(triggered, vec![mom_id]);

        let records = store.list_notifications("u1", mom_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn healthy_valence_does_not_trigger() {
        let (checker, _, _) = fixture(0.3).await;
        assert!(checker.check("u1", Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_triggers() {
        let (checker, store, mom_id) = fixture(-0.7).await;
        let now = Utc::now();
        checker.check("u1", now).await.unwrap();
        // Within the cooldown: no second record.
        checker.check("u1", now + Duration::hours(1)).await.unwrap();
        assert_eq!(store.list_notifications("u1", mom_id).await.unwrap().len(), 1);
        // Past the cooldown: a fresh record.
        checker.check("u1", now + Duration::hours(5)).await.unwrap();
        assert_eq!(store.list_notifications("u1", mom_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_care_circle_members_are_ignored() {
        let (checker, store, mom_id) = fixture(-0.7).await;
        let mut mom = store.get_entity("u1", mom_id).await.unwrap().unwrap();
        mom.care_circle = false;
        store.put_entity(&mom).await.unwrap();
        assert!(checker.check("u1", Utc::now()).await.unwrap().is_empty());
    }
}
