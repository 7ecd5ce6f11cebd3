use dictamesh_fabric::{Producer, TOPIC_SYSTEM_EVENTS};
use dictamesh_types::{
    EntityPointer, EventEnvelope, EventId, EventType, TraceContext, time::now_millis,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::Catalog;
use crate::error::CatalogError;

#[derive(Clone, Debug)]
pub struct RetentionSweeperConfig {
    pub interval: Duration,
}

impl Default for RetentionSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Scheduled compliance job: finds entries whose data outlived their
/// declared retention and emits `retention.deletion_due` system events.
/// Deletion itself belongs to the owning source system; the catalog only
/// signals.
pub struct RetentionSweeper {
    catalog: Catalog,
    producer: Arc<Producer>,
    config: RetentionSweeperConfig,
}

impl RetentionSweeper {
    pub fn new(catalog: Catalog, producer: Arc<Producer>, config: RetentionSweeperConfig) -> Self {
        Self {
            catalog,
            producer,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once(now_millis()).await {
                        tracing::warn!(%err, "retention sweep failed");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    /// One pass: list violations and publish a deletion-due signal per
    /// entry. Returns how many signals went out.
    pub async fn sweep_once(&self, now: i64) -> Result<u32, CatalogError> {
        let catalog = self.catalog.clone();
        let violations =
            tokio::task::spawn_blocking(move || catalog.list_retention_violations(now))
                .await
                .map_err(|e| CatalogError::Storage(format!("sweep task: {e}")))??;

        let mut emitted = 0u32;
        for violation in violations {
            let entry = &violation.entry;
            let mut metadata = BTreeMap::new();
            metadata.insert("catalog_id".to_string(), entry.id.as_str().to_string());
            metadata.insert("overdue_ms".to_string(), violation.overdue_ms.to_string());
            if let Some(retention_days) = entry.classification.retention_days {
                metadata.insert("retention_days".to_string(), retention_days.to_string());
            }

            let envelope = EventEnvelope {
                event_id: EventId::generate(),
                event_type: EventType::RetentionDeletionDue,
                timestamp: now,
                source_system: entry.identity.source_system.clone(),
                domain: entry.identity.domain.clone(),
                entity: EntityPointer {
                    entity_type: entry.identity.entity_type.clone(),
                    id: entry.identity.source_entity_id.clone(),
                    version: 0,
                    url: entry.access.url_template.clone(),
                    etag: None,
                },
                changed_fields: vec![],
                relationships: vec![],
                metadata,
                trace_context: TraceContext::root(),
            };

            match self.producer.publish(TOPIC_SYSTEM_EVENTS, envelope).await {
                Ok(_) => emitted += 1,
                Err(err) => {
                    tracing::warn!(
                        %err,
                        catalog_id = %entry.id,
                        "retention signal publish failed"
                    );
                }
            }
        }
        if emitted > 0 {
            tracing::info!(emitted, "retention deletion-due signals published");
        }
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::registration;
    use dictamesh_fabric::{Broker, ProducerConfig};

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    #[tokio::test]
    async fn sweep_signals_without_deleting() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let mut reg = registration("c-1", "customer");
        reg.classification.retention_days = Some(30);
        let outcome = catalog.register_entity(&reg).expect("register");

        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());
        let sweeper = RetentionSweeper::new(
            catalog.clone(),
            producer,
            RetentionSweeperConfig::default(),
        );

        let now = now_millis();
        assert_eq!(sweeper.sweep_once(now).await.expect("clean sweep"), 0);

        let emitted = sweeper
            .sweep_once(now + 31 * DAY_MS)
            .await
            .expect("overdue sweep");
        assert_eq!(emitted, 1);

        // Signal only: the catalog row is untouched.
        let entry = catalog.get_entity(&outcome.entry.id).expect("entry");
        assert_eq!(entry.id, outcome.entry.id);

        let partitions = broker
            .partition_count(TOPIC_SYSTEM_EVENTS)
            .expect("partitions");
        let mut system_events = Vec::new();
        for partition in 0..partitions {
            system_events.extend(
                broker
                    .fetch(TOPIC_SYSTEM_EVENTS, partition, 0, 16)
                    .expect("fetch"),
            );
        }
        assert_eq!(system_events.len(), 1);
        assert_eq!(
            system_events[0].envelope.event_type,
            EventType::RetentionDeletionDue
        );
        assert_eq!(system_events[0].envelope.entity.id, "c-1");
    }
}
