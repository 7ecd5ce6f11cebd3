use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dictamesh_catalog::{EntityFilter, EntityPatch, EntityRegistration, Page};
use dictamesh_types::{
    AccessDescriptor, CatalogId, Classification, EntityRef, EntryStatus, RequestContext, Sla,
};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

fn default_sla() -> Sla {
    Sla {
        availability_pct: 99.0,
        p99_latency_ms: 1_000,
        freshness_seconds: 3_600,
    }
}

#[derive(Deserialize)]
pub struct RegisterEntityBody {
    pub entity_type: String,
    pub domain: String,
    pub source_system: String,
    pub source_entity_id: String,
    pub access: AccessDescriptor,
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub sla: Option<Sla>,
    #[serde(default)]
    pub classification: Classification,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RegisterEntityBody>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = EntityRegistration {
        identity: EntityRef {
            entity_type: body.entity_type,
            domain: body.domain,
            source_system: body.source_system,
            source_entity_id: body.source_entity_id,
        },
        access: body.access,
        schema_version: body.schema_version,
        sla: body.sla.unwrap_or_else(default_sla),
        classification: body.classification,
    };
    let catalog = state.catalog.clone();
    let outcome = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.register_entity(&registration)
    })
    .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.entry)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.clone();
    let entry = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.get_entity(&CatalogId::new(id))
    })
    .await?;
    Ok(Json(entry))
}

#[derive(Deserialize, Default)]
pub struct ListParams {
    pub entity_type: Option<String>,
    pub domain: Option<String>,
    pub source_system: Option<String>,
    pub status: Option<String>,
    pub pii: Option<bool>,
    /// Full-text query; presence switches to search with facets.
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = ctx.trace.trace_id.as_str();
    let status = match &params.status {
        Some(raw) => Some(EntryStatus::parse(raw).ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                format!("unknown status {raw}"),
                trace_id,
            )
        })?),
        None => None,
    };
    let filter = EntityFilter {
        entity_type: params.entity_type,
        domain: params.domain,
        source_system: params.source_system,
        status,
        pii: params.pii,
    };
    let page = Page {
        limit: params.limit.unwrap_or(50).min(500),
        offset: params.offset.unwrap_or(0),
    };

    let catalog = state.catalog.clone();
    let body = match params.q {
        Some(q) => {
            let result = blocking(trace_id, move || catalog.search(&q, &filter, page)).await?;
            serde_json::to_value(result)
        }
        None => {
            let listing =
                blocking(trace_id, move || catalog.list_entities(&filter, page)).await?;
            serde_json::to_value(listing)
        }
    }
    .map_err(|e| ApiError::internal(format!("serialize listing: {e}"), trace_id))?;
    Ok(Json(body))
}

#[derive(Deserialize, Default)]
pub struct UpdateEntityBody {
    pub access: Option<AccessDescriptor>,
    pub schema_version: Option<u32>,
    pub sla: Option<Sla>,
    pub classification: Option<Classification>,
    pub status: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<UpdateEntityBody>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = ctx.trace.trace_id.as_str();
    let status = match &body.status {
        Some(raw) => Some(EntryStatus::parse(raw).ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                format!("unknown status {raw}"),
                trace_id,
            )
        })?),
        None => None,
    };
    let patch = EntityPatch {
        access: body.access,
        schema_version: body.schema_version,
        sla: body.sla,
        classification: body.classification,
        status,
    };
    let catalog = state.catalog.clone();
    let entry = blocking(trace_id, move || {
        catalog.update_entity(&CatalogId::new(id), &patch)
    })
    .await?;
    Ok(Json(entry))
}

pub async fn archive(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.clone();
    blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.archive_entity(&CatalogId::new(id))
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
