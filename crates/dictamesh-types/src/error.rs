use std::fmt;

/// The shared error taxonomy. Retryability follows the adapter contract:
/// timeouts, rate limits, open breakers and source 5xx are retryable at the
/// caller's discretion; schema and caller errors are not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshError {
    NotFound { entity_type: String, id: String },
    Timeout { elapsed_ms: u64 },
    RateLimited { retry_after_ms: u64 },
    CircuitOpen { source_system: String },
    SourceError { status: u16, message: String },
    SchemaMismatch { detail: String },
    Unauthorized,
    Forbidden,
    BadRequest { detail: String },
    Conflict { detail: String },
    Internal { detail: String },
}

impl MeshError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::CircuitOpen { .. } => true,
            Self::SourceError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::NotFound { .. }
            | Self::SchemaMismatch { .. }
            | Self::Unauthorized
            | Self::Forbidden
            | Self::BadRequest { .. }
            | Self::Conflict { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Stable machine-readable code, used verbatim in the HTTP error
    /// envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ENTITY_NOT_FOUND",
            Self::Timeout { .. } => "SERVICE_UNAVAILABLE",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen { .. } => "SERVICE_UNAVAILABLE",
            Self::SourceError { .. } => "SERVICE_UNAVAILABLE",
            Self::SchemaMismatch { .. } => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest { .. } => "INVALID_REQUEST",
            Self::Conflict { .. } => "CONFLICT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity_type, id } => {
                write!(f, "{entity_type} not found: {id}")
            }
            Self::Timeout { elapsed_ms } => write!(f, "deadline exceeded after {elapsed_ms}ms"),
            Self::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {retry_after_ms}ms")
            }
            Self::CircuitOpen { source_system } => {
                write!(f, "circuit open for {source_system}")
            }
            Self::SourceError { status, message } => {
                write!(f, "source error {status}: {message}")
            }
            Self::SchemaMismatch { detail } => write!(f, "schema mismatch: {detail}"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::BadRequest { detail } => write!(f, "bad request: {detail}"),
            Self::Conflict { detail } => write!(f, "conflict: {detail}"),
            Self::Internal { detail } => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for MeshError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matrix() {
        assert!(MeshError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(MeshError::RateLimited { retry_after_ms: 50 }.is_retryable());
        assert!(
            MeshError::CircuitOpen {
                source_system: "directus".into()
            }
            .is_retryable()
        );
        assert!(
            MeshError::SourceError {
                status: 503,
                message: "upstream".into()
            }
            .is_retryable()
        );
        assert!(
            MeshError::SourceError {
                status: 429,
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(
            !MeshError::SourceError {
                status: 404,
                message: "gone".into()
            }
            .is_retryable()
        );
        assert!(
            !MeshError::SchemaMismatch {
                detail: "field".into()
            }
            .is_retryable()
        );
        assert!(!MeshError::Unauthorized.is_retryable());
        assert!(
            !MeshError::BadRequest {
                detail: "bad".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn codes_match_http_envelope() {
        assert_eq!(
            MeshError::NotFound {
                entity_type: "customer".into(),
                id: "c-1".into()
            }
            .code(),
            "ENTITY_NOT_FOUND"
        );
        assert_eq!(
            MeshError::RateLimited { retry_after_ms: 1 }.code(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(
            MeshError::Internal {
                detail: "boom".into()
            }
            .code(),
            "INTERNAL_ERROR"
        );
    }
}
