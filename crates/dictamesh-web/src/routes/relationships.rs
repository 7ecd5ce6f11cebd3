use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dictamesh_catalog::RelationshipUpsert;
use dictamesh_types::{
    Cardinality, CatalogId, Predicate, RelationshipDirection, RequestContext,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

#[derive(Deserialize)]
pub struct UpsertRelationshipBody {
    pub subject_id: String,
    pub relationship_type: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: Cardinality,
    pub object_id: String,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_cardinality() -> Cardinality {
    Cardinality::OneToMany
}

pub async fn upsert(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<UpsertRelationshipBody>,
) -> Result<impl IntoResponse, ApiError> {
    let upsert = RelationshipUpsert {
        subject_id: CatalogId::new(body.subject_id),
        predicate: Predicate {
            relationship_type: body.relationship_type,
            cardinality: body.cardinality,
        },
        object_id: CatalogId::new(body.object_id),
        subject_name: body.subject_name,
        object_name: body.object_name,
        metadata: body.metadata,
    };
    let catalog = state.catalog.clone();
    let outcome = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.upsert_relationship(&upsert)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Deserialize, Default)]
pub struct DirectionParams {
    pub direction: Option<String>,
}

pub async fn for_entity(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Query(params): Query<DirectionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = ctx.trace.trace_id.as_str();
    let direction = match params.direction.as_deref() {
        None | Some("all") => RelationshipDirection::All,
        Some("outgoing") => RelationshipDirection::Outgoing,
        Some("incoming") => RelationshipDirection::Incoming,
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
    let edges = blocking(trace_id, move || {
        catalog.relationships_for(&CatalogId::new(id), direction)
    })
    .await?;
    Ok(Json(edges))
}

#[derive(Deserialize, Default)]
pub struct TraverseParams {
    pub depth: Option<u32>,
    pub relationship_type: Option<String>,
}

pub async fn traverse(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Query(params): Query<TraverseParams>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.clone();
    let traversal = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.traverse_relationships(
            &CatalogId::new(id),
            params.depth.unwrap_or(3),
            params.relationship_type.as_deref(),
        )
    })
    .await?;
    Ok(Json(traversal))
}
