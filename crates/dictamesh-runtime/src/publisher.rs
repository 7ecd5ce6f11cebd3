use dictamesh_fabric::{Producer, PublishError};
use dictamesh_types::EventEnvelope;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug)]
pub struct ChangePublisherConfig {
    pub buffer: usize,
    /// Resend attempts for transient broker pushback.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ChangePublisherConfig {
    fn default() -> Self {
        Self {
            buffer: 256,
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Best-effort change publishing: adapters hand observed source changes
/// here and keep serving reads no matter what the fabric does. A full
/// buffer drops the new event with a warning, never blocks.
#[derive(Clone)]
pub struct ChangePublisher {
    tx: mpsc::Sender<(String, EventEnvelope)>,
    dropped: Arc<AtomicU64>,
}

impl ChangePublisher {
    pub fn submit(&self, topic: &str, envelope: EventEnvelope) {
        if let Err(err) = self.tx.try_send((topic.to_string(), envelope)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(topic, %err, "change event dropped, publish buffer full");
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub fn spawn_change_publisher(
    producer: Arc<Producer>,
    config: ChangePublisherConfig,
) -> (ChangePublisher, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<(String, EventEnvelope)>(config.buffer);
    let dropped = Arc::new(AtomicU64::new(0));

    let task = tokio::spawn(async move {
        while let Some((topic, envelope)) = rx.recv().await {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match producer.publish(&topic, envelope.clone()).await {
                    Ok(_) => break,
                    Err(PublishError::Transient { reason }) if attempt < config.max_attempts => {
                        tracing::debug!(topic = %topic, attempt, reason, "publish retry");
                        tokio::time::sleep(config.retry_delay * attempt).await;
                    }
                    Err(err) => {
                        tracing::warn!(
                            topic = %topic,
                            event_id = %envelope.event_id,
                            %err,
                            "change event publish abandoned"
                        );
                        break;
                    }
                }
            }
        }
    });

    (
        ChangePublisher {
            tx,
            dropped,
        },
        task,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dictamesh_fabric::{Broker, ProducerConfig, TOPIC_ENTITY_CHANGED};
    use dictamesh_types::{EntityPointer, EventId, EventType, TraceContext};
    use std::collections::BTreeMap;

    fn envelope(event_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(event_id),
            event_type: EventType::EntityCreated,
            timestamp: 0,
            source_system: "memory".into(),
            domain: "customers".into(),
            entity: EntityPointer {
                entity_type: "customer".into(),
                id: "c-1".into(),
                version: 1,
                url: "mem://customers/customer/{id}".into(),
                etag: None,
            },
            changed_fields: vec![],
            relationships: vec![],
            metadata: BTreeMap::new(),
            trace_context: TraceContext::root(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_changes_reach_the_log() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());
        let (publisher, task) =
            spawn_change_publisher(producer, ChangePublisherConfig::default());

        publisher.submit(TOPIC_ENTITY_CHANGED, envelope("e-1"));

        for _ in 0..100 {
            if broker.lag("probe", TOPIC_ENTITY_CHANGED).unwrap_or(0) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.lag("probe", TOPIC_ENTITY_CHANGED).expect("lag"), 1);
        assert_eq!(publisher.dropped(), 0);
        task.abort();
    }
}
