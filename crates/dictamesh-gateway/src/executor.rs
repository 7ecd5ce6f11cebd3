use dictamesh_catalog::{Catalog, CatalogError};
use dictamesh_runtime::{AdapterRegistry, EntityQuery};
use dictamesh_types::{
    CanonicalEntity, CatalogEntry, MeshError, RelationshipDirection, RequestContext,
};
use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::batcher::{Batcher, BatcherConfig};
use crate::complexity::query_cost;
use crate::error::{FieldError, GatewayError};
use crate::query::{Query, Selection};
use crate::schema::{ComposedSchema, FieldKind, SchemaFragment};

#[derive(Clone, Copy, Debug)]
pub struct GatewayConfig {
    pub complexity_ceiling: u32,
    pub batcher: BatcherConfig,
    /// Depth bound for catalog traversal when following references.
    pub relationship_depth: u32,
    pub default_page_size: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            complexity_ceiling: 1_000,
            batcher: BatcherConfig::default(),
            relationship_depth: 2,
            default_page_size: 20,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct QueryResponse {
    pub data: Value,
    pub errors: Vec<FieldError>,
}

/// The federated gateway. Holds the composed schema and executes
/// structured queries against the registered adapters, guided by the
/// catalog's relationship data.
pub struct Gateway {
    fragments: Mutex<Vec<SchemaFragment>>,
    composed: RwLock<ComposedSchema>,
    registry: Arc<AdapterRegistry>,
    catalog: Catalog,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(registry: Arc<AdapterRegistry>, catalog: Catalog, config: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            fragments: Mutex::new(Vec::new()),
            composed: RwLock::new(ComposedSchema::default()),
            registry,
            catalog,
            config,
        })
    }

    /// Dynamic registration: the composed schema is recomputed on every
    /// call, and a failing composition leaves the previous one in place.
    pub fn register_subgraph(&self, fragment: SchemaFragment) -> Result<(), GatewayError> {
        let mut fragments = self.fragments.lock();
        let mut candidate: Vec<SchemaFragment> = fragments
            .iter()
            .filter(|f| f.domain != fragment.domain)
            .cloned()
            .collect();
        candidate.push(fragment);
        let composed = ComposedSchema::compose(&candidate)?;
        tracing::info!(
            domains = candidate.len(),
            types = composed.types.len(),
            "gateway schema recomposed"
        );
        *fragments = candidate;
        *self.composed.write() = composed;
        Ok(())
    }

    pub fn composed_schema(&self) -> ComposedSchema {
        self.composed.read().clone()
    }

    /// Validate, cost-check, then execute. Per-field failures land in the
    /// response's error list; only gateway-level problems return `Err`.
    pub async fn execute(
        &self,
        body: &Value,
        ctx: &RequestContext,
    ) -> Result<QueryResponse, GatewayError> {
        let query = Query::parse(body)?;
        let schema = self.composed_schema();
        query.validate(&schema)?;

        let cost = query_cost(&query.selection, &schema);
        if cost > self.config.complexity_ceiling {
            return Err(GatewayError::QueryTooComplex {
                cost,
                ceiling: self.config.complexity_ceiling,
            });
        }

        let execution = Execution {
            schema: Arc::new(schema),
            batcher: Batcher::new(Arc::clone(&self.registry), self.config.batcher),
            registry: Arc::clone(&self.registry),
            catalog: self.catalog.clone(),
            config: self.config,
            errors: Mutex::new(Vec::new()),
        };
        let data = execution.resolve_root(&query.selection, ctx).await;
        Ok(QueryResponse {
            data,
            errors: execution.errors.into_inner(),
        })
    }
}

struct Execution {
    schema: Arc<ComposedSchema>,
    batcher: Arc<Batcher>,
    registry: Arc<AdapterRegistry>,
    catalog: Catalog,
    config: GatewayConfig,
    errors: Mutex<Vec<FieldError>>,
}

impl Execution {
    async fn resolve_root(&self, selection: &Selection, ctx: &RequestContext) -> Value {
        match selection.field.as_str() {
            "entities" => self.resolve_collection_root(selection, ctx).await,
            "entity" => {
                let entity_type = selection
                    .arguments
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.resolve_single_root(&entity_type, selection, ctx).await
            }
            type_name => {
                let type_name = type_name.to_string();
                self.resolve_single_root(&type_name, selection, ctx).await
            }
        }
    }

    async fn resolve_single_root(
        &self,
        entity_type: &str,
        selection: &Selection,
        ctx: &RequestContext,
    ) -> Value {
        let path = selection.field.clone();
        let Some(id) = selection.arguments.get("id").and_then(Value::as_str) else {
            self.push_error(FieldError {
                path,
                code: "INVALID_REQUEST".into(),
                message: "single-entity roots require an id argument".into(),
            });
            return Value::Null;
        };
        match self.batcher.load(ctx, entity_type, id).await {
            Ok(entity) => {
                self.resolve_object(entity_type, entity, &selection.children, path, ctx)
                    .await
            }
            Err(err) => {
                self.push_error(FieldError::at(path, &err));
                Value::Null
            }
        }
    }

    async fn resolve_collection_root(&self, selection: &Selection, ctx: &RequestContext) -> Value {
        let path = selection.field.clone();
        let entity_type = selection
            .arguments
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (first, offset) = self.page_args(selection);

        let entities = if let Some(ids) = selection.arguments.get("ids").and_then(Value::as_array)
        {
            let ids: Vec<String> = ids
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            let loads = ids.iter().map(|id| {
                let batcher = Arc::clone(&self.batcher);
                let ctx = ctx.clone();
                let entity_type = entity_type.clone();
                async move { batcher.load(&ctx, &entity_type, id.as_str()).await }
            });
            let mut out = Vec::new();
            for (index, outcome) in join_all(loads).await.into_iter().enumerate() {
                match outcome {
                    Ok(entity) => out.push(entity),
                    Err(err) => {
                        self.push_error(FieldError::at(format!("{path}[{index}]"), &err));
                    }
                }
            }
            out
        } else {
            let Some(registered) = self.registry.by_entity_type(&entity_type) else {
                self.push_error(FieldError {
                    path,
                    code: "INVALID_REQUEST".into(),
                    message: format!("no adapter serves entity type {entity_type}"),
                });
                return Value::Null;
            };
            let query = EntityQuery {
                ids: None,
                filter: selection.arguments.get("filter").cloned(),
                limit: Some(offset + first + 1),
            };
            match registered.adapter.query_entities(ctx, &query).await {
                Ok(entities) => entities,
                Err(err) => {
                    self.push_error(FieldError::at(path, &err));
                    return Value::Null;
                }
            }
        };

        self.connection(&entity_type, entities, &selection.children, first, offset, path, ctx)
            .await
    }

    /// Resolve one entity's selected fields. Scalars read from the
    /// canonical payload; references fan out concurrently, each through
    /// the per-request batcher.
    fn resolve_object<'a>(
        &'a self,
        type_name: &'a str,
        entity: CanonicalEntity,
        children: &'a [Selection],
        path: String,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Value> {
        async move {
            let Some(composed) = self.schema.type_named(type_name) else {
                return Value::Null;
            };
            let key_field = composed.key_field.clone();
            let entity = Arc::new(entity);

            let futures = children.iter().map(|child| {
                let field_path = format!("{path}.{}", child.field);
                let entity = Arc::clone(&entity);
                let kind = composed.fields.get(&child.field).map(|f| f.kind.clone());
                let key_field = key_field.clone();
                async move {
                    let value = if child.field == key_field {
                        Value::String(entity.entity_id.clone())
                    } else {
                        match kind {
                            Some(FieldKind::Scalar) | None => entity
                                .payload
                                .get(&child.field)
                                .cloned()
                                .unwrap_or(Value::Null),
                            Some(FieldKind::Reference {
                                target,
                                many,
                                relationship_type,
                            }) => {
                                self.resolve_reference(
                                    type_name,
                                    &entity.entity_id,
                                    child,
                                    &target,
                                    many,
                                    &relationship_type,
                                    field_path.clone(),
                                    ctx,
                                )
                                .await
                            }
                        }
                    };
                    (child.field.clone(), value)
                }
            });

            let mut map = serde_json::Map::new();
            for (field, value) in join_all(futures).await {
                map.insert(field, value);
            }
            Value::Object(map)
        }
        .boxed()
    }

    /// Cross-subgraph reference: bounded catalog traversal discovers the
    /// target ids, the target subgraph's batcher loads them. Failed ids
    /// produce error entries without collapsing the surrounding object.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_reference(
        &self,
        subject_type: &str,
        subject_id: &str,
        selection: &Selection,
        target_type: &str,
        many: bool,
        relationship_type: &str,
        path: String,
        ctx: &RequestContext,
    ) -> Value {
        let targets = match self
            .related_entries(subject_type, subject_id, relationship_type, target_type)
            .await
        {
            Ok(targets) => targets,
            Err(err) => {
                self.push_error(FieldError::at(path, &err));
                return Value::Null;
            }
        };

        if !many {
            let Some(entry) = targets.first() else {
                return Value::Null;
            };
            return match self
                .batcher
                .load(ctx, target_type, &entry.identity.source_entity_id)
                .await
            {
                Ok(entity) => {
                    self.resolve_object(target_type, entity, &selection.children, path, ctx)
                        .await
                }
                Err(err) => {
                    self.push_error(FieldError::at(path, &err));
                    Value::Null
                }
            };
        }

        let loads = targets.iter().map(|entry| {
            let batcher = Arc::clone(&self.batcher);
            let ctx = ctx.clone();
            let target_type = target_type.to_string();
            let id = entry.identity.source_entity_id.clone();
            async move { batcher.load(&ctx, &target_type, &id).await }
        });
        let mut entities = Vec::new();
        for (index, outcome) in join_all(loads).await.into_iter().enumerate() {
            match outcome {
                Ok(entity) => entities.push(entity),
                Err(err) => {
                    self.push_error(FieldError::at(format!("{path}[{index}]"), &err));
                }
            }
        }
        let (first, offset) = self.page_args(selection);
        self.connection(
            target_type,
            entities,
            &selection.children,
            first,
            offset,
            path,
            ctx,
        )
        .await
    }

    /// Connection shape shared by collection roots and many-references.
    #[allow(clippy::too_many_arguments)]
    async fn connection(
        &self,
        type_name: &str,
        entities: Vec<CanonicalEntity>,
        children: &[Selection],
        first: u32,
        offset: u32,
        path: String,
        ctx: &RequestContext,
    ) -> Value {
        let total = entities.len();
        let page: Vec<CanonicalEntity> = entities
            .into_iter()
            .skip(offset as usize)
            .take(first as usize)
            .collect();
        let page_len = page.len();

        let nodes = join_all(page.into_iter().enumerate().map(|(index, entity)| {
            self.resolve_object(
                type_name,
                entity,
                children,
                format!("{path}[{}]", offset as usize + index),
                ctx,
            )
        }))
        .await;

        json!({
            "nodes": nodes,
            "totalCount": total,
            "pageInfo": {
                "hasNextPage": (offset as usize) + page_len < total,
                "hasPreviousPage": offset > 0,
                "startCursor": offset.to_string(),
                "endCursor": (offset as usize + page_len.saturating_sub(1)).to_string(),
            }
        })
    }

    /// Catalog lookup for one reference hop: current edges of the given
    /// type around the subject, bounded traversal outward plus direct
    /// incoming edges for back-references. A subject the catalog has not
    /// seen yet simply has no references.
    async fn related_entries(
        &self,
        subject_type: &str,
        subject_id: &str,
        relationship_type: &str,
        target_type: &str,
    ) -> Result<Vec<CatalogEntry>, MeshError> {
        let Some(registered) = self.registry.by_entity_type(subject_type) else {
            return Err(MeshError::BadRequest {
                detail: format!("no adapter serves entity type {subject_type}"),
            });
        };
        let source_system = registered.source_system.clone();
        let catalog = self.catalog.clone();
        let subject_type = subject_type.to_string();
        let subject_id = subject_id.to_string();
        let relationship_type = relationship_type.to_string();
        let target_type = target_type.to_string();
        let depth = self.config.relationship_depth;

        let result = tokio::task::spawn_blocking(move || -> Result<Vec<CatalogEntry>, CatalogError> {
            let subject = match catalog.find_by_source(&source_system, &subject_id, &subject_type) {
                Ok(subject) => subject,
                Err(CatalogError::NotFound { .. }) => return Ok(Vec::new()),
                Err(err) => return Err(err),
            };

            let mut targets = Vec::new();
            let traversal =
                catalog.traverse_relationships(&subject.id, depth, Some(&relationship_type))?;
            for node in traversal.nodes.iter().filter(|n| n.depth > 0) {
                let entry = catalog.get_entity(&node.id)?;
                if entry.identity.entity_type == target_type {
                    targets.push(entry);
                }
            }

            // Back-references arrive over incoming edges.
            for edge in
                catalog.relationships_for(&subject.id, RelationshipDirection::Incoming)?
            {
                if edge.predicate.relationship_type != relationship_type {
                    continue;
                }
                let entry = catalog.get_entity(&edge.subject_id)?;
                if entry.identity.entity_type == target_type
                    && !targets.iter().any(|t| t.id == entry.id)
                {
                    targets.push(entry);
                }
            }

            targets.sort_by(|a, b| {
                a.identity
                    .source_entity_id
                    .cmp(&b.identity.source_entity_id)
            });
            Ok(targets)
        })
        .await
        .map_err(|e| MeshError::Internal {
            detail: format!("catalog lookup task: {e}"),
        })?;

        result.map_err(MeshError::from)
    }

    fn page_args(&self, selection: &Selection) -> (u32, u32) {
        let first = selection
            .arguments
            .get("first")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(self.config.default_page_size)
            .max(1);
        let offset = selection
            .arguments
            .get("after")
            .and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .map(|v| v as u32)
            .unwrap_or(0);
        (first, offset)
    }

    fn push_error(&self, error: FieldError) {
        tracing::debug!(path = %error.path, code = %error.code, "field error");
        self.errors.lock().push(error);
    }
}
