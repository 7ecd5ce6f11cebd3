//! The event fabric: ordered, partitioned, durable-enough delivery of
//! change events with idempotent production and resumable consumption.
//!
//! The broker keeps one log per topic partition; the partition key is the
//! subject entity id, so all events for one entity land on one partition
//! and are consumed in producer order. Producers dedup resends by
//! `event_id`; consumers commit offsets manually after a successful
//! handler return, retry in place, and republish poison records to the
//! dead-letter topic.
//!
//! Delivery is at-least-once. Consumers that need exactly-once effects
//! dedup by `event_id` on their side; nothing stronger is promised.

mod broker;
mod codec;
mod consumer;
mod metrics;
mod producer;
mod topic;

pub use broker::{Broker, TopicError};
pub use codec::{
    CodecError, DEFAULT_MAX_FRAME_BYTES, decode_envelope, decode_frame, encode_envelope,
    encode_frame,
};
pub use consumer::{ConsumerHandle, EventHandler, HandlerError, SubscribeConfig, subscribe};
pub use metrics::{FabricMetrics, MetricsSnapshot, TopicMetrics};
pub use producer::{Producer, ProducerConfig, PublishError, PublishReceipt};
pub use topic::{
    CleanupPolicy, StoredRecord, TOPIC_CACHE_INVALIDATION, TOPIC_DEAD_LETTER,
    TOPIC_ENTITY_CHANGED, TOPIC_RELATIONSHIP_CHANGED, TOPIC_SCHEMA_CHANGED, TOPIC_SYSTEM_EVENTS,
    TopicConfig, standard_topics, topic_for,
};

/// Header key carrying the failure reason on dead-lettered records.
pub const HEADER_FAILURE_REASON: &str = "failure_reason";
/// Header keys recording where a dead-lettered record originally lived.
pub const HEADER_ORIGIN_TOPIC: &str = "origin_topic";
pub const HEADER_ORIGIN_PARTITION: &str = "origin_partition";
pub const HEADER_ORIGIN_OFFSET: &str = "origin_offset";
