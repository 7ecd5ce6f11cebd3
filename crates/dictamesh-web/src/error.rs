use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dictamesh_catalog::CatalogError;
use dictamesh_gateway::GatewayError;
use dictamesh_types::MeshError;
use serde::Serialize;
use serde_json::Value;

/// The uniform error envelope every endpoint returns on failure.
#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, Debug)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub trace_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
    /// Extra response headers, e.g. Retry-After guidance.
    pub headers: Vec<(&'static str, String)>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>, trace_id: &str) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: ErrorDetail {
                    code: code.to_string(),
                    message: message.into(),
                    details: None,
                    trace_id: trace_id.to_string(),
                },
            },
            headers: Vec::new(),
        }
    }

    pub fn from_mesh(err: &MeshError, trace_id: &str) -> Self {
        let status = match err {
            MeshError::NotFound { .. } => StatusCode::NOT_FOUND,
            MeshError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            MeshError::Unauthorized => StatusCode::UNAUTHORIZED,
            MeshError::Forbidden => StatusCode::FORBIDDEN,
            MeshError::BadRequest { .. } | MeshError::SchemaMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            MeshError::Conflict { .. } => StatusCode::CONFLICT,
            MeshError::Timeout { .. }
            | MeshError::CircuitOpen { .. }
            | MeshError::SourceError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MeshError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut api = Self::new(status, err.code(), err.to_string(), trace_id);
        if let MeshError::RateLimited { retry_after_ms } = err {
            api.headers.push((
                "Retry-After",
                retry_after_ms.div_ceil(1000).max(1).to_string(),
            ));
        }
        api
    }

    pub fn from_catalog(err: CatalogError, trace_id: &str) -> Self {
        Self::from_mesh(&MeshError::from(err), trace_id)
    }

    pub fn from_gateway(err: GatewayError, trace_id: &str) -> Self {
        match err {
            GatewayError::QueryTooComplex { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                err.to_string(),
                trace_id,
            ),
            GatewayError::UnknownType(_) => Self::new(
                StatusCode::NOT_FOUND,
                "ENTITY_NOT_FOUND",
                err.to_string(),
                trace_id,
            ),
            GatewayError::Validation(_) | GatewayError::Composition(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                err.to_string(),
                trace_id,
            ),
        }
    }

    pub fn internal(message: impl Into<String>, trace_id: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            message,
            trace_id,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        for (name, value) in self.headers {
            if let Ok(value) = value.parse() {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}
