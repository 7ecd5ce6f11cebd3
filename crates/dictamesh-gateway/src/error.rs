use serde::Serialize;
use std::fmt;

/// Request-level failures; any of these fails the whole query before or
/// during planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    Validation(String),
    UnknownType(String),
    QueryTooComplex { cost: u32, ceiling: u32 },
    Composition(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(detail) => write!(f, "invalid query: {detail}"),
            Self::UnknownType(name) => write!(f, "unknown entity type: {name}"),
            Self::QueryTooComplex { cost, ceiling } => {
                write!(f, "query cost {cost} exceeds ceiling {ceiling}")
            }
            Self::Composition(detail) => write!(f, "subgraph composition failed: {detail}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// One per-field failure inside an otherwise successful response.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn at(path: impl Into<String>, err: &dictamesh_types::MeshError) -> Self {
        Self {
            path: path.into(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
