//! The federated query gateway: one query API composed from per-domain
//! subgraphs.
//!
//! Subgraphs declare entity types with a key field, scalar fields, and
//! references to other types; composition merges fragments on shared
//! type names and rejects conflicting ownership. Execution resolves the
//! selection tree concurrently, routes every by-id fetch through a
//! per-request batcher (no N+1 fan-out), and follows cross-subgraph
//! references through the catalog's current relationship edges.
//!
//! Failure stays local: a field that cannot resolve produces an entry in
//! the response's error list while sibling fields proceed. Only
//! gateway-level problems (validation, composition, complexity) fail the
//! whole request.

mod batcher;
mod complexity;
mod error;
mod executor;
mod query;
mod schema;

pub use batcher::{Batcher, BatcherConfig};
pub use complexity::query_cost;
pub use error::{FieldError, GatewayError};
pub use executor::{Gateway, GatewayConfig, QueryResponse};
pub use query::{Query, Selection};
pub use schema::{ComposedSchema, ComposedType, FieldDef, FieldKind, SchemaFragment, TypeDef};
