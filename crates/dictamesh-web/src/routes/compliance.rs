use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::response::IntoResponse;
use dictamesh_types::{RequestContext, time::now_millis};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

pub async fn pii(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.clone();
    let entries = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.list_pii_entities()
    })
    .await?;
    Ok(Json(entries))
}

#[derive(Deserialize, Default)]
pub struct RetentionParams {
    /// Evaluation timestamp in epoch millis; defaults to now. Exposed so
    /// compliance tooling can ask "what breaches as of date X".
    pub now: Option<i64>,
}

pub async fn retention(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<RetentionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let now = params.now.unwrap_or_else(now_millis);
    let catalog = state.catalog.clone();
    let violations = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.list_retention_violations(now)
    })
    .await?;
    Ok(Json(violations))
}
