use dashmap::DashMap;
use dictamesh_types::{EventEnvelope, time::now_millis};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::metrics::FabricMetrics;
use crate::topic::{CleanupPolicy, StoredRecord, Topic, TopicConfig, standard_topics};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    UnknownTopic { name: String },
    ConfigMismatch { name: String },
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTopic { name } => write!(f, "unknown topic: {name}"),
            Self::ConfigMismatch { name } => {
                write!(f, "topic {name} already exists with a different config")
            }
        }
    }
}

impl std::error::Error for TopicError {}

/// In-process partitioned log. One instance per process; producers and
/// consumer groups share it behind an `Arc`.
pub struct Broker {
    topics: DashMap<String, Arc<Topic>>,
    /// Next offset to consume, per (group, topic, partition).
    group_offsets: DashMap<(String, String, u32), u64>,
    metrics: FabricMetrics,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            group_offsets: DashMap::new(),
            metrics: FabricMetrics::new(),
        })
    }

    /// Idempotent topic provisioning: re-creating with an identical config
    /// is a no-op, with a differing config an error.
    pub fn create_topic(&self, config: TopicConfig) -> Result<(), TopicError> {
        if let Some(existing) = self.topics.get(&config.name) {
            if existing.config == config {
                return Ok(());
            }
            return Err(TopicError::ConfigMismatch { name: config.name });
        }
        tracing::info!(
            topic = %config.name,
            partitions = config.partitions,
            cleanup = ?config.cleanup,
            "topic created"
        );
        self.topics
            .insert(config.name.clone(), Arc::new(Topic::new(config)));
        Ok(())
    }

    /// Provision the whole standard taxonomy.
    pub fn ensure_standard_topics(&self) -> Result<(), TopicError> {
        for config in standard_topics() {
            self.create_topic(config)?;
        }
        Ok(())
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn partition_count(&self, topic: &str) -> Result<u32, TopicError> {
        self.topic(topic).map(|t| t.partition_count())
    }

    /// `hash(partition_key) % partitions`; stable for the process lifetime.
    pub fn partition_for(&self, topic: &str, key: &str) -> Result<u32, TopicError> {
        let topic = self.topic(topic)?;
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        Ok((hasher.finish() % topic.partition_count() as u64) as u32)
    }

    pub(crate) fn append(
        &self,
        topic_name: &str,
        headers: BTreeMap<String, String>,
        envelope: EventEnvelope,
    ) -> Result<(u32, u64), TopicError> {
        let topic = self.topic(topic_name)?;
        let key = envelope.partition_key().to_string();
        let partition = self.partition_for(topic_name, &key)?;
        let offset = topic.append(partition, key, headers, envelope, now_millis());
        self.metrics.on_published(topic_name);
        Ok((partition, offset))
    }

    /// Read records at or past `from_offset`. Public so out-of-band
    /// observers (tests, the stats endpoint) can peek without joining a
    /// consumer group.
    pub fn fetch(
        &self,
        topic_name: &str,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> Result<Vec<StoredRecord>, TopicError> {
        let topic = self.topic(topic_name)?;
        Ok(topic.fetch(partition, from_offset, max))
    }

    /// The latest record per key of a compacted topic, across all
    /// partitions.
    pub fn compacted_view(&self, topic_name: &str) -> Result<Vec<StoredRecord>, TopicError> {
        let topic = self.topic(topic_name)?;
        if topic.config.cleanup != CleanupPolicy::Compact {
            return Err(TopicError::ConfigMismatch {
                name: topic_name.to_string(),
            });
        }
        let mut out = Vec::new();
        for partition in 0..topic.partition_count() {
            out.extend(topic.compacted_view(partition));
        }
        Ok(out)
    }

    pub fn committed(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.group_offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub(crate) fn commit(&self, group: &str, topic: &str, partition: u32, next_offset: u64) {
        self.group_offsets.insert(
            (group.to_string(), topic.to_string(), partition),
            next_offset,
        );
    }

    /// Uncommitted records for one group across all partitions of a topic.
    pub fn lag(&self, group: &str, topic_name: &str) -> Result<u64, TopicError> {
        let topic = self.topic(topic_name)?;
        let mut lag = 0u64;
        for partition in 0..topic.partition_count() {
            let latest = topic.partition(partition).latest_offset();
            let committed = self.committed(group, topic_name, partition);
            lag += latest.saturating_sub(committed);
        }
        Ok(lag)
    }

    pub fn metrics(&self) -> &FabricMetrics {
        &self.metrics
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, TopicError> {
        self.topics
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| TopicError::UnknownTopic {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TOPIC_ENTITY_CHANGED;
    use dictamesh_types::{EntityPointer, EventId, EventType, TraceContext};

    fn envelope(event_id: &str, entity_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(event_id),
            event_type: EventType::EntityCreated,
            timestamp: 0,
            source_system: "directus".into(),
            domain: "customers".into(),
            entity: EntityPointer {
                entity_type: "customer".into(),
                id: entity_id.into(),
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

    #[test]
    fn create_topic_is_idempotent() {
        let broker = Broker::new();
        let config = TopicConfig::new("entity.changed", 12);
        broker.create_topic(config.clone()).expect("first create");
        broker
            .create_topic(config)
            .expect("identical re-create should be a no-op");

        let err = broker
            .create_topic(TopicConfig::new("entity.changed", 6))
            .expect_err("differing config should conflict");
        assert!(matches!(err, TopicError::ConfigMismatch { .. }));
    }

    #[test]
    fn same_key_lands_on_same_partition() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");

        let (p1, o1) = broker
            .append(TOPIC_ENTITY_CHANGED, BTreeMap::new(), envelope("e-1", "c-1"))
            .expect("append");
        let (p2, o2) = broker
            .append(TOPIC_ENTITY_CHANGED, BTreeMap::new(), envelope("e-2", "c-1"))
            .expect("append");

        assert_eq!(p1, p2, "one entity, one partition");
        assert_eq!(o2, o1 + 1, "producer order preserved within a partition");
    }

    #[test]
    fn lag_counts_uncommitted_records() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let (partition, _) = broker
            .append(TOPIC_ENTITY_CHANGED, BTreeMap::new(), envelope("e-1", "c-1"))
            .expect("append");
        broker
            .append(TOPIC_ENTITY_CHANGED, BTreeMap::new(), envelope("e-2", "c-1"))
            .expect("append");

        assert_eq!(broker.lag("catalog", TOPIC_ENTITY_CHANGED).expect("lag"), 2);
        broker.commit("catalog", TOPIC_ENTITY_CHANGED, partition, 1);
        assert_eq!(broker.lag("catalog", TOPIC_ENTITY_CHANGED).expect("lag"), 1);
    }

    #[test]
    fn unknown_topic_is_an_error() {
        let broker = Broker::new();
        let err = broker
            .append("nope", BTreeMap::new(), envelope("e-1", "c-1"))
            .expect_err("unknown topic should fail");
        assert!(matches!(err, TopicError::UnknownTopic { .. }));
    }
}
