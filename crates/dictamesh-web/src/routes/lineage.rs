use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dictamesh_types::{CatalogId, LineageDirection, RequestContext};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

#[derive(Deserialize, Default)]
pub struct LineageParams {
    pub direction: Option<String>,
    pub depth: Option<u32>,
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Query(params): Query<LineageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = ctx.trace.trace_id.as_str();
    let direction = match params.direction.as_deref() {
        None | Some("down") => LineageDirection::Down,
        Some("up") => LineageDirection::Up,
        Some("both") => LineageDirection::Both,
        Some(other) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                format!("unknown direction {other}"),
                trace_id,
            ));
        }
    };
    let catalog = state.catalog.clone();
    let graph = blocking(trace_id, move || {
        catalog.get_lineage(
            &CatalogId::new(id),
            params.depth.unwrap_or(3),
            direction,
            params.include_inactive,
        )
    })
    .await?;
    Ok(Json(graph))
}
