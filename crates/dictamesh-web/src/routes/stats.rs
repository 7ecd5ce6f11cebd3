use axum::Json;
use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use dictamesh_catalog::{EntityFilter, Page};
use dictamesh_fabric::MetricsSnapshot;
use dictamesh_runtime::AdapterMetricsSnapshot;
use dictamesh_types::RequestContext;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

#[derive(Serialize)]
pub struct StatsResponse {
    pub entities_total: u64,
    pub event_partitions: Vec<String>,
    pub topics: Vec<String>,
    pub catalog_lag: u64,
    pub fabric: MetricsSnapshot,
    pub adapters: BTreeMap<String, AdapterMetricsSnapshot>,
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = ctx.trace.trace_id.as_str();

    let catalog = state.catalog.clone();
    let entities_total = blocking(trace_id, move || {
        catalog.list_entities(&EntityFilter::default(), Page { limit: 1, offset: 0 })
    })
    .await?
    .pagination
    .total;

    let catalog = state.catalog.clone();
    let event_partitions = blocking(trace_id, move || catalog.event_partitions()).await?;

    let topics = state.broker.topic_names();
    let catalog_lag = topics
        .iter()
        .map(|topic| state.broker.lag("catalog", topic).unwrap_or(0))
        .sum();

    let mut adapters = BTreeMap::new();
    for domain in state.registry.domains() {
        if let Some(registered) = state.registry.by_domain(&domain) {
            adapters.insert(domain, registered.adapter.metrics());
        }
    }

    Ok(Json(StatsResponse {
        entities_total,
        event_partitions,
        topics,
        catalog_lag,
        fabric: state.broker.metrics().snapshot(),
        adapters,
    }))
}
