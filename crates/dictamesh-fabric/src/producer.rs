use dictamesh_types::EventEnvelope;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::broker::{Broker, TopicError};
use crate::codec::{CodecError, encode_envelope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Retryable: the broker is saturated or briefly unreachable.
    Transient { reason: String },
    /// Poison: retrying the same record can never succeed.
    Permanent { reason: String },
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient { reason } => write!(f, "transient publish failure: {reason}"),
            Self::Permanent { reason } => write!(f, "permanent publish failure: {reason}"),
        }
    }
}

impl std::error::Error for PublishError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// True when this publish was deduplicated against an earlier send of
    /// the same `event_id`; the receipt then describes the original write.
    pub duplicate: bool,
}

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    /// Bound on unacknowledged publishes; beyond it `publish` applies
    /// backpressure by failing with `Transient`.
    pub max_in_flight: usize,
    /// How many recent (topic, event_id) pairs the resend dedup remembers.
    pub dedup_window: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1024,
            dedup_window: 4096,
        }
    }
}

struct DedupState {
    receipts: HashMap<(String, String), PublishReceipt>,
    order: VecDeque<(String, String)>,
}

/// Idempotent producer over the broker: resends of the same `event_id` to
/// the same topic collapse into the original write.
pub struct Producer {
    broker: Arc<Broker>,
    config: ProducerConfig,
    in_flight: tokio::sync::Semaphore,
    dedup: Mutex<DedupState>,
}

impl Producer {
    pub fn new(broker: Arc<Broker>, config: ProducerConfig) -> Arc<Self> {
        let permits = config.max_in_flight;
        Arc::new(Self {
            broker,
            config,
            in_flight: tokio::sync::Semaphore::new(permits),
            dedup: Mutex::new(DedupState {
                receipts: HashMap::new(),
                order: VecDeque::new(),
            }),
        })
    }

    pub async fn publish(
        &self,
        topic: &str,
        envelope: EventEnvelope,
    ) -> Result<PublishReceipt, PublishError> {
        self.publish_with_headers(topic, BTreeMap::new(), envelope)
            .await
    }

    pub async fn publish_with_headers(
        &self,
        topic: &str,
        headers: BTreeMap<String, String>,
        envelope: EventEnvelope,
    ) -> Result<PublishReceipt, PublishError> {
        if envelope.event_id.as_str().is_empty() {
            return Err(PublishError::Permanent {
                reason: "empty event_id".into(),
            });
        }

        let dedup_key = (topic.to_string(), envelope.event_id.as_str().to_string());
        if let Some(receipt) = self.dedup.lock().receipts.get(&dedup_key) {
            let mut receipt = receipt.clone();
            receipt.duplicate = true;
            return Ok(receipt);
        }

        // Size and serializability gate; a record the codec rejects now
        // would poison every consumer later.
        if let Err(err) = encode_envelope(&envelope) {
            return Err(match err {
                CodecError::Json(reason) => PublishError::Permanent { reason },
                other => PublishError::Permanent {
                    reason: other.to_string(),
                },
            });
        }

        let _permit = self.in_flight.try_acquire().map_err(|_| {
            PublishError::Transient {
                reason: format!(
                    "producer buffer full ({} in flight)",
                    self.config.max_in_flight
                ),
            }
        })?;

        let event_id = envelope.event_id.clone();
        let (partition, offset) = self.broker.append(topic, headers, envelope).map_err(
            |err| match err {
                TopicError::UnknownTopic { .. } => PublishError::Permanent {
                    reason: err.to_string(),
                },
                TopicError::ConfigMismatch { .. } => PublishError::Permanent {
                    reason: err.to_string(),
                },
            },
        )?;

        tracing::debug!(
            topic,
            partition,
            offset,
            event_id = %event_id,
            "event published"
        );

        let receipt = PublishReceipt {
            topic: topic.to_string(),
            partition,
            offset,
            duplicate: false,
        };
        self.remember(dedup_key, receipt.clone());
        Ok(receipt)
    }

    fn remember(&self, key: (String, String), receipt: PublishReceipt) {
        let mut dedup = self.dedup.lock();
        if dedup.receipts.insert(key.clone(), receipt).is_none() {
            dedup.order.push_back(key);
        }
        while dedup.order.len() > self.config.dedup_window {
            if let Some(evicted) = dedup.order.pop_front() {
                dedup.receipts.remove(&evicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TOPIC_ENTITY_CHANGED;
    use dictamesh_types::{EntityPointer, EventId, EventType, TraceContext};

    fn envelope(event_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(event_id),
            event_type: EventType::EntityCreated,
            timestamp: 0,
            source_system: "directus".into(),
            domain: "customers".into(),
            entity: EntityPointer {
                entity_type: "customer".into(),
                id: "c-1".into(),
                version: 1,
                url: "https://api.directus.example/items/customer/{id}".into(),
                etag: None,
            },
            changed_fields: vec![],
            relationships: vec![],
            metadata: BTreeMap::new(),
            trace_context: TraceContext::root(),
        }
    }

    fn producer() -> Arc<Producer> {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        Producer::new(broker, ProducerConfig::default())
    }

    #[tokio::test]
    async fn double_publish_yields_one_logical_event() {
        let producer = producer();
        let first = producer
            .publish(TOPIC_ENTITY_CHANGED, envelope("e-42"))
            .await
            .expect("first publish");
        let second = producer
            .publish(TOPIC_ENTITY_CHANGED, envelope("e-42"))
            .await
            .expect("resend should be deduplicated");

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!((second.partition, second.offset), (first.partition, first.offset));
    }

    #[tokio::test]
    async fn unknown_topic_is_permanent() {
        let broker = Broker::new();
        let producer = Producer::new(broker, ProducerConfig::default());
        let err = producer
            .publish("missing", envelope("e-1"))
            .await
            .expect_err("publish to a missing topic should fail");
        assert!(matches!(err, PublishError::Permanent { .. }));
    }

    #[tokio::test]
    async fn saturated_buffer_applies_backpressure() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let producer = Producer::new(
            broker,
            ProducerConfig {
                max_in_flight: 0,
                dedup_window: 16,
            },
        );
        let err = producer
            .publish(TOPIC_ENTITY_CHANGED, envelope("e-1"))
            .await
            .expect_err("zero permits should backpressure");
        assert!(matches!(err, PublishError::Transient { .. }));
    }
}
