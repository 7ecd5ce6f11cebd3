//! Core nomenclature shared across the DictaMesh runtime model.
//!
//! - `CatalogEntry`: a registered entity instance in a source system.
//! - `Relationship`: a directed, typed edge between two catalog entries,
//!   with temporal validity (`valid_to = None` means "current").
//! - `SchemaDef`: a versioned schema definition for an entity type.
//! - `LineageEdge`: a data-flow edge describing how data moved between
//!   two catalog entries.
//! - `EventEnvelope`: the canonical wire format of a change event. It is
//!   a pointer plus a delta, never a full entity clone.
//!
//! In short: adapters observe source systems and emit envelopes, the
//! catalog records entries and their edges, and everything downstream
//! speaks in terms of the types defined here.

mod cache;
mod context;
mod entry;
mod error;
mod event;
mod ids;
mod lineage;
mod relationship;
mod schema;
pub mod time;

pub use cache::{CacheLayer, CacheStatus};
pub use context::RequestContext;
pub use entry::{
    AccessDescriptor, AuthKind, CanonicalEntity, CatalogEntry, Classification, EntityRef,
    EntryStatus, HttpMethod, Sla,
};
pub use error::MeshError;
pub use event::{
    EntityPointer, EventEnvelope, EventLogRecord, EventType, RelatedRef, TraceContext,
};
pub use ids::{CatalogId, EventId, SpanId, TraceId};
pub use lineage::{LineageDescriptor, LineageDirection, LineageEdge, TransformationKind};
pub use relationship::{Cardinality, Predicate, Relationship, RelationshipDirection};
pub use schema::{SchemaDef, SchemaFormat};
