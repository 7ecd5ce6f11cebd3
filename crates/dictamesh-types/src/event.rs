use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{CatalogId, EventId, SpanId, TraceId};

/// The known event taxonomy. Wire names are dotted, `<subject>.<verb>`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "entity.created")]
    EntityCreated,
    #[serde(rename = "entity.updated")]
    EntityUpdated,
    #[serde(rename = "entity.deleted")]
    EntityDeleted,
    #[serde(rename = "entity.archived")]
    EntityArchived,
    #[serde(rename = "relationship.created")]
    RelationshipCreated,
    #[serde(rename = "relationship.deleted")]
    RelationshipDeleted,
    #[serde(rename = "schema.registered")]
    SchemaRegistered,
    #[serde(rename = "schema.deprecated")]
    SchemaDeprecated,
    #[serde(rename = "cache.invalidated")]
    CacheInvalidated,
    #[serde(rename = "adapter.registered")]
    AdapterRegistered,
    #[serde(rename = "adapter.started")]
    AdapterStarted,
    #[serde(rename = "adapter.stopped")]
    AdapterStopped,
    #[serde(rename = "health.changed")]
    HealthChanged,
    #[serde(rename = "retention.deletion_due")]
    RetentionDeletionDue,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EntityCreated => "entity.created",
            Self::EntityUpdated => "entity.updated",
            Self::EntityDeleted => "entity.deleted",
            Self::EntityArchived => "entity.archived",
            Self::RelationshipCreated => "relationship.created",
            Self::RelationshipDeleted => "relationship.deleted",
            Self::SchemaRegistered => "schema.registered",
            Self::SchemaDeprecated => "schema.deprecated",
            Self::CacheInvalidated => "cache.invalidated",
            Self::AdapterRegistered => "adapter.registered",
            Self::AdapterStarted => "adapter.started",
            Self::AdapterStopped => "adapter.stopped",
            Self::HealthChanged => "health.changed",
            Self::RetentionDeletionDue => "retention.deletion_due",
        }
    }
}

/// Where to fetch the current state of the changed entity. The `url`
/// carries an `{id}` placeholder so consumers go through the source of
/// truth instead of trusting a payload clone.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EntityPointer {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    pub version: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// A reference to a related entity carried alongside the change.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RelatedRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    pub relationship_type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
}

impl TraceContext {
    pub fn root() -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
        }
    }

    /// A child context sharing the trace id, with this span as parent.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: SpanId::generate(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }
}

/// Canonical envelope for change propagation: a pointer plus a delta,
/// deliberately not a full entity clone.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: EventType,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub source_system: String,
    pub domain: String,
    pub entity: EntityPointer,
    pub changed_fields: Vec<String>,
    pub relationships: Vec<RelatedRef>,
    pub metadata: BTreeMap<String, String>,
    pub trace_context: TraceContext,
}

impl EventEnvelope {
    /// All events for one entity share a partition key, so they land on
    /// one partition and are consumed in producer order.
    pub fn partition_key(&self) -> &str {
        &self.entity.id
    }
}

/// Immutable audit of one applied state change, as persisted by the
/// catalog. Time-partitioned by event date.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventLogRecord {
    pub event_id: EventId,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<CatalogId>,
    pub entity_type: String,
    pub changed_fields: Vec<String>,
    /// Full envelope retained for replay.
    pub payload: EventEnvelope,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub event_timestamp: i64,
    pub ingested_at: i64,
}
