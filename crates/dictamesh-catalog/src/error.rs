use dictamesh_types::MeshError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    NotFound { what: &'static str, key: String },
    Conflict(String),
    InvalidInput(String),
    IncompatibleSchema { entity_type: String, version: u32, detail: String },
    Storage(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what, key } => write!(f, "{what} not found: {key}"),
            Self::Conflict(detail) => write!(f, "conflict: {detail}"),
            Self::InvalidInput(detail) => write!(f, "invalid input: {detail}"),
            Self::IncompatibleSchema {
                entity_type,
                version,
                detail,
            } => write!(
                f,
                "schema {entity_type} v{version} is not backward compatible: {detail}"
            ),
            Self::Storage(detail) => write!(f, "storage error: {detail}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("stored json: {err}"))
    }
}

impl From<CatalogError> for MeshError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { what, key } => MeshError::NotFound {
                entity_type: what.to_string(),
                id: key,
            },
            CatalogError::Conflict(detail) => MeshError::Conflict { detail },
            CatalogError::InvalidInput(detail) => MeshError::BadRequest { detail },
            CatalogError::IncompatibleSchema { detail, .. } => {
                MeshError::SchemaMismatch { detail }
            }
            CatalogError::Storage(detail) => MeshError::Internal { detail },
        }
    }
}
