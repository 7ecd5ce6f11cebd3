use dashmap::DashMap;
use dictamesh_catalog::{Catalog, CatalogError};
use dictamesh_fabric::{TOPIC_SYSTEM_EVENTS, topic_for};
use dictamesh_types::{
    EntityPointer, EventEnvelope, EventId, EventType, MeshError, TraceContext,
    time::now_millis,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::adapter::{Capability, ChangeStreamHandle, SourceAdapter};
use crate::cache::SharedCache;
use crate::health::CheckResult;
use crate::pipeline::{ResilientAdapter, ResilientAdapterConfig};
use crate::publisher::ChangePublisher;

pub struct RegisteredAdapter {
    pub domain: String,
    pub entity_type: String,
    pub source_system: String,
    pub capabilities: Vec<Capability>,
    pub adapter: Arc<ResilientAdapter>,
}

impl std::fmt::Debug for RegisteredAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAdapter")
            .field("domain", &self.domain)
            .field("entity_type", &self.entity_type)
            .field("source_system", &self.source_system)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Process-wide adapter registry: wraps each source adapter in the
/// resilience envelope, records its schema in the catalog, announces it
/// on the system topic, and pumps its change stream into the fabric.
pub struct AdapterRegistry {
    by_domain: DashMap<String, Arc<RegisteredAdapter>>,
    by_entity_type: DashMap<String, Arc<RegisteredAdapter>>,
    pumps: DashMap<String, JoinHandle<()>>,
}

impl AdapterRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            by_domain: DashMap::new(),
            by_entity_type: DashMap::new(),
            pumps: DashMap::new(),
        })
    }

    pub async fn register(
        &self,
        source: Arc<dyn SourceAdapter>,
        change_stream: Option<ChangeStreamHandle>,
        config: ResilientAdapterConfig,
        l2: Arc<dyn SharedCache>,
        catalog: Catalog,
        publisher: ChangePublisher,
    ) -> Result<Arc<RegisteredAdapter>, MeshError> {
        let domain = source.domain().to_string();
        let entity_type = source.entity_type().to_string();
        if self.by_entity_type.contains_key(&entity_type) {
            return Err(MeshError::Conflict {
                detail: format!("entity type {entity_type} already has an adapter"),
            });
        }

        // The adapter's schema joins the registry before any entity
        // flows; a replayed registration of the same version is fine.
        let schema = source.schema();
        let schema_catalog = catalog.clone();
        let outcome =
            tokio::task::spawn_blocking(move || schema_catalog.register_schema(&schema))
                .await
                .map_err(|e| MeshError::Internal {
                    detail: format!("schema registration task: {e}"),
                })?;
        match outcome {
            Ok(_) | Err(CatalogError::Conflict(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let capabilities = source.capabilities().to_vec();
        let source_system = source.source_system().to_string();
        let announcement = registration_envelope(source.as_ref());
        let registered = Arc::new(RegisteredAdapter {
            domain: domain.clone(),
            entity_type: entity_type.clone(),
            source_system,
            capabilities,
            adapter: Arc::new(ResilientAdapter::new(
                source,
                l2,
                Some(catalog),
                config,
            )?),
        });

        publisher.submit(TOPIC_SYSTEM_EVENTS, announcement);

        if let Some(stream) = change_stream {
            let pump = spawn_change_pump(stream, publisher.clone());
            self.pumps.insert(domain.clone(), pump);
        }

        tracing::info!(
            domain = %domain,
            entity_type = %entity_type,
            "adapter registered"
        );
        self.by_domain.insert(domain, Arc::clone(&registered));
        self.by_entity_type
            .insert(entity_type, Arc::clone(&registered));
        Ok(registered)
    }

    pub fn by_domain(&self, domain: &str) -> Option<Arc<RegisteredAdapter>> {
        self.by_domain.get(domain).map(|r| Arc::clone(r.value()))
    }

    pub fn by_entity_type(&self, entity_type: &str) -> Option<Arc<RegisteredAdapter>> {
        self.by_entity_type
            .get(entity_type)
            .map(|r| Arc::clone(r.value()))
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.by_domain.iter().map(|r| r.key().clone()).collect();
        domains.sort();
        domains
    }

    /// One readiness check per registered adapter.
    pub async fn health_checks(&self) -> Vec<CheckResult> {
        let mut checks = Vec::new();
        let adapters: Vec<Arc<RegisteredAdapter>> = self
            .by_domain
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for registered in adapters {
            let report = registered.adapter.health().await;
            checks.push(CheckResult {
                name: format!("adapter:{}", registered.domain),
                state: report.state,
                detail: None,
            });
        }
        checks.sort_by(|a, b| a.name.cmp(&b.name));
        checks
    }

    pub async fn shutdown(&self) {
        for entry in self.pumps.iter() {
            entry.value().abort();
        }
    }
}

fn registration_envelope(source: &dyn SourceAdapter) -> EventEnvelope {
    let mut metadata = BTreeMap::new();
    metadata.insert("adapter".to_string(), source.name().to_string());
    EventEnvelope {
        event_id: EventId::generate(),
        event_type: EventType::AdapterRegistered,
        timestamp: now_millis(),
        source_system: source.source_system().to_string(),
        domain: source.domain().to_string(),
        entity: EntityPointer {
            entity_type: source.entity_type().to_string(),
            id: source.name().to_string(),
            version: source.schema().version as u64,
            url: source.access().url_template,
            etag: None,
        },
        changed_fields: vec![],
        relationships: vec![],
        metadata,
        trace_context: TraceContext::root(),
    }
}

fn spawn_change_pump(
    mut stream: ChangeStreamHandle,
    publisher: ChangePublisher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            let topic = topic_for(envelope.event_type);
            publisher.submit(topic, envelope);
        }
        tracing::debug!("change stream drained, pump exiting");
    })
}
