use axum::Json;
use axum::extract::{Extension, State};
use dictamesh_gateway::QueryResponse;
use dictamesh_types::RequestContext;
use serde_json::Value;

use crate::app::AppState;
use crate::error::ApiError;

/// The single federated query endpoint: a structured query in, a
/// `{data, errors}` tree out. Per-field failures live in `errors`;
/// gateway-level failures use the uniform envelope.
pub async fn execute(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Value>,
) -> Result<Json<QueryResponse>, ApiError> {
    state
        .gateway
        .execute(&body, &ctx)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_gateway(err, ctx.trace.trace_id.as_str()))
}
