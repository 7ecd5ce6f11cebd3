use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dictamesh_types::{RequestContext, SchemaDef, SchemaFormat};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::blocking;

#[derive(Deserialize)]
pub struct RegisterSchemaBody {
    pub entity_type: String,
    pub version: u32,
    pub format: SchemaFormat,
    pub definition: String,
    #[serde(default = "default_true")]
    pub backward_compatible: bool,
    #[serde(default)]
    pub forward_compatible: bool,
}

fn default_true() -> bool {
    true
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RegisterSchemaBody>,
) -> Result<impl IntoResponse, ApiError> {
    let candidate = SchemaDef {
        entity_type: body.entity_type,
        version: body.version,
        format: body.format,
        definition: body.definition,
        backward_compatible: body.backward_compatible,
        forward_compatible: body.forward_compatible,
        registered_at: 0,
        deprecated_at: None,
        retired_at: None,
    };
    let catalog = state.catalog.clone();
    let registered = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.register_schema(&candidate)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(entity_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.clone();
    let timeline = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.list_schemas(&entity_type)
    })
    .await?;
    Ok(Json(timeline))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((entity_type, version)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.clone();
    let schema = blocking(ctx.trace.trace_id.as_str(), move || {
        catalog.get_schema(&entity_type, version)
    })
    .await?;
    Ok(Json(schema))
}
