use async_trait::async_trait;
use dictamesh_types::{
    AccessDescriptor, CanonicalEntity, EventEnvelope, LineageDescriptor, MeshError,
    RequestContext, SchemaDef, Sla,
};
use tokio::sync::{mpsc, watch};

use crate::health::HealthReport;

/// What one adapter declares it can do. Adapters implement only the
/// capabilities they claim; the registry and gateway route accordingly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    ReadOne,
    ReadMany,
    StreamChanges,
    Health,
    DescribeSchema,
    DescribeSla,
    DescribeLineage,
}

/// A read-many request: either an explicit id set (the gateway batch
/// path) or a filter document with a row cap.
#[derive(Clone, Debug, Default)]
pub struct EntityQuery {
    pub ids: Option<Vec<String>>,
    pub filter: Option<serde_json::Value>,
    pub limit: Option<u32>,
}

impl EntityQuery {
    pub fn by_ids(ids: Vec<String>) -> Self {
        Self {
            ids: Some(ids),
            filter: None,
            limit: None,
        }
    }
}

/// The contract every source-system adapter implements. The runtime wraps
/// implementations in [`crate::ResilientAdapter`]; nothing calls these
/// methods directly in production paths.
#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn domain(&self) -> &str;
    fn source_system(&self) -> &str;
    fn entity_type(&self) -> &str;
    fn capabilities(&self) -> &[Capability];

    /// How consumers reach entities at the source; the url template
    /// carries an `{id}` placeholder.
    fn access(&self) -> AccessDescriptor;

    async fn get_entity(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<CanonicalEntity, MeshError>;

    async fn query_entities(
        &self,
        ctx: &RequestContext,
        query: &EntityQuery,
    ) -> Result<Vec<CanonicalEntity>, MeshError>;

    fn schema(&self) -> SchemaDef;
    fn sla(&self) -> Sla;
    fn lineage(&self) -> LineageDescriptor;

    async fn health(&self) -> HealthReport;
}

/// Declared via [`Capability::StreamChanges`]: a pull-based, unbounded
/// change sequence whose consumer may cancel at any point.
pub trait ChangeStream: Send + Sync {
    fn stream_changes(&self) -> ChangeStreamHandle;
}

pub struct ChangeStreamHandle {
    events: mpsc::Receiver<EventEnvelope>,
    cancel: watch::Sender<bool>,
}

impl ChangeStreamHandle {
    pub fn new(events: mpsc::Receiver<EventEnvelope>, cancel: watch::Sender<bool>) -> Self {
        Self { events, cancel }
    }

    /// Next change, or `None` once the producer side shut down.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        self.events.recv().await
    }

    /// Tells the producer to stop and closes the intake; already-buffered
    /// events still drain through `next`.
    pub fn cancel(&mut self) {
        let _ = self.cancel.send(true);
        self.events.close();
    }
}

impl Drop for ChangeStreamHandle {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}
