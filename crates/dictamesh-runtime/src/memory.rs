use async_trait::async_trait;
use dashmap::DashMap;
use dictamesh_types::{
    AccessDescriptor, AuthKind, CanonicalEntity, EntityPointer, EventEnvelope, EventId, EventType,
    HttpMethod, LineageDescriptor, MeshError, RequestContext, SchemaDef, SchemaFormat, Sla,
    TraceContext, time::now_millis,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::adapter::{
    Capability, ChangeStream, ChangeStreamHandle, EntityQuery, SourceAdapter,
};
use crate::health::HealthReport;

const CAPABILITIES: &[Capability] = &[
    Capability::ReadOne,
    Capability::ReadMany,
    Capability::StreamChanges,
    Capability::Health,
    Capability::DescribeSchema,
    Capability::DescribeSla,
    Capability::DescribeLineage,
];

/// Reference adapter backed by an in-process map. Used by tests, demos
/// and as the template for real source integrations; supports fault
/// injection so resilience behavior can be driven deterministically.
pub struct MemoryAdapter {
    name: String,
    domain: String,
    source_system: String,
    entity_type: String,
    store: DashMap<String, CanonicalEntity>,
    faults: Mutex<VecDeque<MeshError>>,
    latency: Mutex<Option<Duration>>,
    subscribers: Mutex<Vec<mpsc::Sender<EventEnvelope>>>,
}

impl MemoryAdapter {
    pub fn new(
        domain: impl Into<String>,
        source_system: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        let domain = domain.into();
        let entity_type = entity_type.into();
        Self {
            name: format!("{domain}-{entity_type}-adapter"),
            domain,
            source_system: source_system.into(),
            entity_type,
            store: DashMap::new(),
            faults: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Insert or replace an entity and emit the matching change event to
    /// every open change stream.
    pub fn put(&self, id: &str, payload: serde_json::Value) -> EventEnvelope {
        let existed = self.store.contains_key(id);
        let version = self
            .store
            .get(id)
            .map(|e| e.version + 1)
            .unwrap_or(1);
        let changed_fields = if existed {
            payload
                .as_object()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        self.store.insert(
            id.to_string(),
            CanonicalEntity {
                entity_type: self.entity_type.clone(),
                entity_id: id.to_string(),
                version,
                payload,
                etag: Some(format!("\"v{version}\"")),
                fetched_at: now_millis(),
            },
        );

        let envelope = self.envelope(
            if existed {
                EventType::EntityUpdated
            } else {
                EventType::EntityCreated
            },
            id,
            version,
            changed_fields,
        );
        self.fan_out(&envelope);
        envelope
    }

    pub fn remove(&self, id: &str) -> Option<EventEnvelope> {
        let removed = self.store.remove(id)?;
        let envelope = self.envelope(EventType::EntityDeleted, id, removed.1.version, vec![]);
        self.fan_out(&envelope);
        Some(envelope)
    }

    /// Queue errors to fail the next source calls with; used to drive
    /// breaker and retry behavior in tests.
    pub fn inject_faults(&self, faults: impl IntoIterator<Item = MeshError>) {
        self.faults.lock().extend(faults);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn envelope(
        &self,
        event_type: EventType,
        id: &str,
        version: u64,
        changed_fields: Vec<String>,
    ) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::generate(),
            event_type,
            timestamp: now_millis(),
            source_system: self.source_system.clone(),
            domain: self.domain.clone(),
            entity: EntityPointer {
                entity_type: self.entity_type.clone(),
                id: id.to_string(),
                version,
                url: self.access().url_template,
                etag: None,
            },
            changed_fields,
            relationships: vec![],
            metadata: BTreeMap::new(),
            trace_context: TraceContext::root(),
        }
    }

    fn fan_out(&self, envelope: &EventEnvelope) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.try_send(envelope.clone()).is_ok());
    }

    async fn simulate_source(&self) -> Result<(), MeshError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self.faults.lock().pop_front();
        match fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SourceAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn source_system(&self) -> &str {
        &self.source_system
    }

    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn access(&self) -> AccessDescriptor {
        AccessDescriptor {
            url_template: format!(
                "mem://{}/{}/{{id}}",
                self.source_system, self.entity_type
            ),
            method: HttpMethod::Get,
            auth: AuthKind::None,
        }
    }

    async fn get_entity(
        &self,
        _ctx: &RequestContext,
        id: &str,
    ) -> Result<CanonicalEntity, MeshError> {
        self.simulate_source().await?;
        self.store
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| MeshError::NotFound {
                entity_type: self.entity_type.clone(),
                id: id.to_string(),
            })
    }

    async fn query_entities(
        &self,
        _ctx: &RequestContext,
        query: &EntityQuery,
    ) -> Result<Vec<CanonicalEntity>, MeshError> {
        self.simulate_source().await?;
        let limit = query.limit.unwrap_or(u32::MAX) as usize;
        match &query.ids {
            Some(ids) => Ok(ids
                .iter()
                .filter_map(|id| self.store.get(id).map(|entry| entry.clone()))
                .take(limit)
                .collect()),
            None => {
                let mut all: Vec<CanonicalEntity> =
                    self.store.iter().map(|entry| entry.clone()).collect();
                all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
                all.truncate(limit);
                Ok(all)
            }
        }
    }

    fn schema(&self) -> SchemaDef {
        SchemaDef {
            entity_type: self.entity_type.clone(),
            version: 1,
            format: SchemaFormat::JsonSchema,
            definition: format!(
                r#"{{"type": "object", "properties": {{"id": {{"type": "string"}}}}, "required": ["id"], "title": "{}"}}"#,
                self.entity_type
            ),
            backward_compatible: true,
            forward_compatible: false,
            registered_at: now_millis(),
            deprecated_at: None,
            retired_at: None,
        }
    }

    fn sla(&self) -> Sla {
        Sla {
            availability_pct: 99.9,
            p99_latency_ms: 50,
            freshness_seconds: 1,
        }
    }

    fn lineage(&self) -> LineageDescriptor {
        LineageDescriptor {
            upstream_systems: vec![self.source_system.clone()],
            description: Some("in-process reference store".into()),
        }
    }

    async fn health(&self) -> HealthReport {
        HealthReport::healthy()
    }
}

impl ChangeStream for MemoryAdapter {
    fn stream_changes(&self) -> ChangeStreamHandle {
        let (tx, rx) = mpsc::channel(64);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.subscribers.lock().push(tx.clone());

        // Sender side closes once the consumer cancels; the fan-out
        // drops disconnected subscribers on the next event.
        tokio::spawn(async move {
            let _ = cancel_rx.changed().await;
            drop(tx);
        });

        ChangeStreamHandle::new(rx, cancel_tx)
    }
}
