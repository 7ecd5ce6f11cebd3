pub mod compliance;
pub mod entities;
pub mod events;
pub mod health;
pub mod lineage;
pub mod query;
pub mod relationships;
pub mod schemas;
pub mod stats;

use dictamesh_catalog::CatalogError;

use crate::error::ApiError;

/// Catalog work is blocking SQLite; every handler routes it through the
/// blocking pool and maps failures into the uniform envelope.
pub(crate) async fn blocking<T, F>(trace_id: &str, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, CatalogError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ApiError::from_catalog(err, trace_id)),
        Err(err) => Err(ApiError::internal(format!("blocking task: {err}"), trace_id)),
    }
}
