use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::response::IntoResponse;
use dictamesh_catalog::EventFilter;
use dictamesh_types::{CatalogId, RequestContext};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

#[derive(Deserialize, Default)]
pub struct EventParams {
    pub event_type: Option<String>,
    pub catalog_id: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<EventParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = EventFilter {
        event_type: params.event_type,
        catalog_id: params.catalog_id.map(CatalogId::new),
        from: params.from,
        to: params.to,
        limit: params.limit.map(|l| l.min(1_000)),
    };
    let catalog = state.catalog.clone();
    let events = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.list_events(&filter)
    })
    .await?;
    Ok(Json(events))
}
