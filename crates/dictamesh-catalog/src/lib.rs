//! The metadata catalog: the single source of truth for what entities
//! exist, where they live, how they relate, and how data flowed between
//! them.
//!
//! Backed by SQLite. All tables carry the `dictamesh_` prefix, indexes the
//! `idx_dictamesh_` prefix. Nothing is ever hard-deleted: entries archive
//! via their status column, relationship edges close by getting a
//! `valid_to`, lineage edges deactivate, and the event log only grows
//! (and is archivable per monthly partition).
//!
//! The catalog owns every write to its tables. Other components reach it
//! through the API here or by publishing events the catalog consumer
//! applies.

mod cache_status;
mod compliance;
mod consumer;
mod db;
mod entities;
mod error;
mod events;
mod lineage;
mod relationships;
mod retention;
mod schema;
mod schemas;

pub use cache_status::CacheWrite;
pub use compliance::RetentionViolation;
pub use consumer::CatalogEventHandler;
pub use db::Db;
pub use entities::{
    EntityFilter, EntityListing, EntityPatch, EntityRegistration, Facets, Page, Pagination,
    RegisterOutcome, SearchResult,
};
pub use error::CatalogError;
pub use events::EventFilter;
pub use lineage::{LineageGraph, LineageNode};
pub use relationships::{RelationshipUpsert, Traversal, TraversalNode, UpsertedRelationship};
pub use retention::{RetentionSweeper, RetentionSweeperConfig};
pub use schemas::{CompatChecker, JsonSchemaCompat, StructuralCompat};

use std::path::Path;

/// Depth ceiling for relationship and lineage traversal.
pub const MAX_TRAVERSAL_DEPTH: u32 = 10;

/// Handle to one catalog store. Cheap to clone; clones share the
/// underlying connection.
#[derive(Clone)]
pub struct Catalog {
    pub(crate) db: Db,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let db = Db::open(path)?;
        schema::init(&db)?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let db = Db::open_in_memory()?;
        schema::init(&db)?;
        Ok(Self { db })
    }
}
