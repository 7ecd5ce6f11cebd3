use dictamesh_types::EventEnvelope;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

pub const TOPIC_ENTITY_CHANGED: &str = "entity.changed";
pub const TOPIC_RELATIONSHIP_CHANGED: &str = "relationship.changed";
pub const TOPIC_SCHEMA_CHANGED: &str = "schema.changed";
pub const TOPIC_CACHE_INVALIDATION: &str = "cache.invalidation";
pub const TOPIC_SYSTEM_EVENTS: &str = "system.events";
pub const TOPIC_DEAD_LETTER: &str = "dead-letter";

/// Standard partition tiers: 12 for primary topics, 6 for schema and
/// dead-letter, 3 for system topics.
const PRIMARY_PARTITIONS: u32 = 12;
const SECONDARY_PARTITIONS: u32 = 6;
const SYSTEM_PARTITIONS: u32 = 3;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Time-based deletion past the retention window.
    Delete,
    /// Retain the latest record per partition key.
    Compact,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: u32,
    pub replication: u32,
    pub retention_ms: i64,
    pub cleanup: CleanupPolicy,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication: 3,
            retention_ms: 7 * DAY_MS,
            cleanup: CleanupPolicy::Delete,
        }
    }

    pub fn retention_ms(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }

    pub fn compact(mut self) -> Self {
        self.cleanup = CleanupPolicy::Compact;
        self
    }
}

/// Which standard topic a given event type rides on.
pub fn topic_for(event_type: dictamesh_types::EventType) -> &'static str {
    use dictamesh_types::EventType::*;
    match event_type {
        EntityCreated | EntityUpdated | EntityDeleted | EntityArchived => TOPIC_ENTITY_CHANGED,
        RelationshipCreated | RelationshipDeleted => TOPIC_RELATIONSHIP_CHANGED,
        SchemaRegistered | SchemaDeprecated => TOPIC_SCHEMA_CHANGED,
        CacheInvalidated => TOPIC_CACHE_INVALIDATION,
        AdapterRegistered | AdapterStarted | AdapterStopped | HealthChanged
        | RetentionDeletionDue => TOPIC_SYSTEM_EVENTS,
    }
}

/// The standard topic taxonomy, provisioned in one call at startup.
pub fn standard_topics() -> Vec<TopicConfig> {
    vec![
        TopicConfig::new(TOPIC_ENTITY_CHANGED, PRIMARY_PARTITIONS),
        TopicConfig::new(TOPIC_RELATIONSHIP_CHANGED, PRIMARY_PARTITIONS),
        TopicConfig::new(TOPIC_SCHEMA_CHANGED, SECONDARY_PARTITIONS).compact(),
        TopicConfig::new(TOPIC_CACHE_INVALIDATION, PRIMARY_PARTITIONS)
            .retention_ms(5 * 60 * 1000),
        TopicConfig::new(TOPIC_SYSTEM_EVENTS, SYSTEM_PARTITIONS).retention_ms(3 * DAY_MS),
        TopicConfig::new(TOPIC_DEAD_LETTER, SECONDARY_PARTITIONS).retention_ms(30 * DAY_MS),
    ]
}

#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub headers: BTreeMap<String, String>,
    pub envelope: EventEnvelope,
    pub published_at: i64,
}

pub(crate) struct PartitionLog {
    records: RwLock<VecDeque<StoredRecord>>,
    next_offset: AtomicU64,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            next_offset: AtomicU64::new(0),
        }
    }

    pub(crate) fn latest_offset(&self) -> u64 {
        self.next_offset.load(Ordering::Acquire)
    }
}

pub(crate) struct Topic {
    pub(crate) config: TopicConfig,
    partitions: Vec<PartitionLog>,
}

impl Topic {
    pub(crate) fn new(config: TopicConfig) -> Self {
        assert!(
            config.partitions > 0,
            "invariant violated: topic {} must have at least one partition",
            config.name
        );
        let partitions = (0..config.partitions).map(|_| PartitionLog::new()).collect();
        Self { config, partitions }
    }

    pub(crate) fn partition(&self, index: u32) -> &PartitionLog {
        &self.partitions[index as usize]
    }

    pub(crate) fn partition_count(&self) -> u32 {
        self.config.partitions
    }

    pub(crate) fn append(
        &self,
        partition: u32,
        key: String,
        headers: BTreeMap<String, String>,
        envelope: EventEnvelope,
        now: i64,
    ) -> u64 {
        let log = self.partition(partition);
        let mut records = log.records.write();
        let offset = log.next_offset.fetch_add(1, Ordering::AcqRel);
        records.push_back(StoredRecord {
            topic: self.config.name.clone(),
            partition,
            offset,
            key,
            headers,
            envelope,
            published_at: now,
        });
        match self.config.cleanup {
            CleanupPolicy::Delete => {
                let horizon = now - self.config.retention_ms;
                while records.front().is_some_and(|r| r.published_at < horizon) {
                    records.pop_front();
                }
            }
            CleanupPolicy::Compact => {
                // Latest record per key wins; earlier offsets for the same
                // key disappear from the log, offsets stay monotonic.
                let latest_key = records
                    .back()
                    .map(|r| r.key.clone())
                    .unwrap_or_default();
                let last_offset = offset;
                records.retain(|r| r.key != latest_key || r.offset == last_offset);
            }
        }
        offset
    }

    pub(crate) fn fetch(&self, partition: u32, from_offset: u64, max: usize) -> Vec<StoredRecord> {
        let log = self.partition(partition);
        let records = log.records.read();
        records
            .iter()
            .filter(|r| r.offset >= from_offset)
            .take(max)
            .cloned()
            .collect()
    }

    /// Latest record per key across one partition of a compacted topic.
    pub(crate) fn compacted_view(&self, partition: u32) -> Vec<StoredRecord> {
        let log = self.partition(partition);
        let records = log.records.read();
        let mut latest: HashMap<String, StoredRecord> = HashMap::new();
        for record in records.iter() {
            latest.insert(record.key.clone(), record.clone());
        }
        let mut out: Vec<StoredRecord> = latest.into_values().collect();
        out.sort_by_key(|r| r.offset);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dictamesh_types::{EntityPointer, EventId, EventType, TraceContext};

    fn envelope(event_id: &str, entity_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(event_id),
            event_type: EventType::SchemaRegistered,
            timestamp: 0,
            source_system: "registry".into(),
            domain: "schemas".into(),
            entity: EntityPointer {
                entity_type: "schema".into(),
                id: entity_id.into(),
                version: 1,
                url: "mesh://schemas/{id}".into(),
                etag: None,
            },
            changed_fields: vec![],
            relationships: vec![],
            metadata: BTreeMap::new(),
            trace_context: TraceContext::root(),
        }
    }

    #[test]
    fn standard_topics_match_the_taxonomy() {
        let topics = standard_topics();
        let find = |name: &str| {
            topics
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("missing standard topic {name}"))
        };
        assert_eq!(find(TOPIC_ENTITY_CHANGED).partitions, 12);
        assert_eq!(find(TOPIC_RELATIONSHIP_CHANGED).partitions, 12);
        assert_eq!(find(TOPIC_SCHEMA_CHANGED).partitions, 6);
        assert_eq!(find(TOPIC_SCHEMA_CHANGED).cleanup, CleanupPolicy::Compact);
        assert_eq!(find(TOPIC_SYSTEM_EVENTS).partitions, 3);
        assert_eq!(find(TOPIC_DEAD_LETTER).partitions, 6);
        assert!(
            find(TOPIC_CACHE_INVALIDATION).retention_ms < find(TOPIC_DEAD_LETTER).retention_ms
        );
    }

    #[test]
    fn compaction_retains_latest_per_key() {
        let topic = Topic::new(TopicConfig::new("schema.changed", 1).compact());
        topic.append(0, "customer".into(), BTreeMap::new(), envelope("e-1", "customer"), 1);
        topic.append(0, "order".into(), BTreeMap::new(), envelope("e-2", "order"), 2);
        topic.append(0, "customer".into(), BTreeMap::new(), envelope("e-3", "customer"), 3);

        let view = topic.compacted_view(0);
        assert_eq!(view.len(), 2);
        let customer = view
            .iter()
            .find(|r| r.key == "customer")
            .expect("customer key should survive compaction");
        assert_eq!(customer.envelope.event_id.as_str(), "e-3");
    }

    #[test]
    fn delete_cleanup_prunes_past_retention() {
        let topic = Topic::new(TopicConfig::new("entity.changed", 1).retention_ms(100));
        topic.append(0, "a".into(), BTreeMap::new(), envelope("e-1", "a"), 1_000);
        topic.append(0, "b".into(), BTreeMap::new(), envelope("e-2", "b"), 1_200);

        let records = topic.fetch(0, 0, 16);
        assert_eq!(records.len(), 1, "expired record should be pruned");
        assert_eq!(records[0].envelope.event_id.as_str(), "e-2");
    }

    #[test]
    fn offsets_are_monotonic_per_partition() {
        let topic = Topic::new(TopicConfig::new("entity.changed", 2));
        let a = topic.append(0, "x".into(), BTreeMap::new(), envelope("e-1", "x"), 1);
        let b = topic.append(0, "y".into(), BTreeMap::new(), envelope("e-2", "y"), 1);
        let c = topic.append(1, "z".into(), BTreeMap::new(), envelope("e-3", "z"), 1);
        assert_eq!((a, b), (0, 1));
        assert_eq!(c, 0, "partitions keep independent offset sequences");
    }
}
