use axum::Router;
use axum::routing::{get, post};
use dictamesh_catalog::{
    Catalog, CatalogEventHandler, RetentionSweeper, RetentionSweeperConfig,
};
use dictamesh_fabric::{
    Broker, ConsumerHandle, Producer, ProducerConfig, SubscribeConfig, TOPIC_ENTITY_CHANGED,
    TOPIC_RELATIONSHIP_CHANGED, TOPIC_SCHEMA_CHANGED, subscribe,
};
use dictamesh_gateway::{FieldDef, Gateway, GatewayConfig, SchemaFragment, TypeDef};
use dictamesh_runtime::{
    AdapterRegistry, ChangePublisher, ChangePublisherConfig, ChangeStream, MemoryAdapter,
    MemorySharedCache, Probes, RateLimitConfig, ResilientAdapterConfig, SourceAdapter,
    TokenBucket, spawn_change_publisher,
};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::Config;
use crate::middleware;
use crate::routes;

/// Everything a running mesh node holds: the shared log, the catalog and
/// its consumer, the adapter registry, and the gateway.
pub struct Mesh {
    pub catalog: Catalog,
    pub broker: Arc<Broker>,
    pub producer: Arc<Producer>,
    pub publisher: ChangePublisher,
    pub registry: Arc<AdapterRegistry>,
    pub gateway: Arc<Gateway>,
    pub probes: Arc<Probes>,
    consumer: Option<ConsumerHandle>,
    shutdown: watch::Sender<bool>,
}

impl Mesh {
    /// Consumer lag of the catalog group across its subscribed topics.
    pub fn catalog_lag(&self) -> u64 {
        self.consumer.as_ref().map(|c| c.lag()).unwrap_or(0)
    }

    /// Orderly teardown: stop background loops, then drain the consumer.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(consumer) = self.consumer.take() {
            consumer.stop().await;
        }
        self.registry.shutdown().await;
        tracing::info!("mesh shut down");
    }
}

pub async fn build_mesh(config: &Config) -> Result<Mesh, String> {
    let broker = Broker::new();
    broker
        .ensure_standard_topics()
        .map_err(|e| format!("provision topics: {e}"))?;
    let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());
    let (publisher, _publish_task) =
        spawn_change_publisher(Arc::clone(&producer), ChangePublisherConfig::default());

    let catalog = match &config.db_path {
        Some(path) => Catalog::open(path),
        None => Catalog::open_in_memory(),
    }
    .map_err(|e| format!("open catalog: {e}"))?;

    let consumer = subscribe(
        Arc::clone(&broker),
        Arc::clone(&producer),
        SubscribeConfig::new(
            "catalog",
            vec![
                TOPIC_ENTITY_CHANGED.into(),
                TOPIC_RELATIONSHIP_CHANGED.into(),
                TOPIC_SCHEMA_CHANGED.into(),
            ],
        ),
        Arc::new(CatalogEventHandler::new(catalog.clone())),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let sweeper = RetentionSweeper::new(
        catalog.clone(),
        Arc::clone(&producer),
        RetentionSweeperConfig::default(),
    );
    tokio::spawn(sweeper.run(shutdown_rx));

    let registry = AdapterRegistry::new();
    let gateway = Gateway::new(
        Arc::clone(&registry),
        catalog.clone(),
        GatewayConfig::default(),
    );
    let probes = Arc::new(Probes::new());

    let mesh = Mesh {
        catalog,
        broker,
        producer,
        publisher,
        registry,
        gateway,
        probes,
        consumer: Some(consumer),
        shutdown,
    };

    if config.demo {
        register_demo_adapter(&mesh).await?;
    }

    mesh.probes.mark_startup_complete();
    Ok(mesh)
}

/// Demo wiring: one in-memory customer adapter with a live change stream
/// and a matching subgraph, so a fresh node answers queries immediately.
async fn register_demo_adapter(mesh: &Mesh) -> Result<(), String> {
    let adapter = Arc::new(MemoryAdapter::new("customers", "demo", "customer"));
    adapter.put(
        "c-1",
        serde_json::json!({"id": "c-1", "name": "Ada Lovelace"}),
    );
    let stream = adapter.stream_changes();
    mesh.registry
        .register(
            adapter as Arc<dyn SourceAdapter>,
            Some(stream),
            ResilientAdapterConfig::default(),
            Arc::new(MemorySharedCache::new()),
            mesh.catalog.clone(),
            mesh.publisher.clone(),
        )
        .await
        .map_err(|e| format!("register demo adapter: {e}"))?;

    mesh.gateway
        .register_subgraph(SchemaFragment {
            domain: "customers".into(),
            types: vec![TypeDef {
                name: "customer".into(),
                key_field: "id".into(),
                fields: vec![FieldDef::scalar("id"), FieldDef::scalar("name")],
            }],
        })
        .map_err(|e| format!("register demo subgraph: {e}"))?;
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub broker: Arc<Broker>,
    pub registry: Arc<AdapterRegistry>,
    pub gateway: Arc<Gateway>,
    pub probes: Arc<Probes>,
    pub limiter: Arc<TokenBucket>,
    pub auth_tokens: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(mesh: &Mesh, config: &Config) -> Self {
        Self {
            catalog: mesh.catalog.clone(),
            broker: Arc::clone(&mesh.broker),
            registry: Arc::clone(&mesh.registry),
            gateway: Arc::clone(&mesh.gateway),
            probes: Arc::clone(&mesh.probes),
            limiter: Arc::new(TokenBucket::new(RateLimitConfig {
                capacity: config.rate_limit_burst,
                refill_per_sec: config.rate_limit_per_sec,
            })),
            auth_tokens: Arc::new(config.auth_tokens.clone()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/catalog/entities",
            post(routes::entities::create).get(routes::entities::list),
        )
        .route(
            "/catalog/entities/{id}",
            get(routes::entities::get_one)
                .put(routes::entities::update)
                .delete(routes::entities::archive),
        )
        .route(
            "/catalog/entities/{id}/relationships",
            get(routes::relationships::for_entity),
        )
        .route(
            "/catalog/entities/{id}/traverse",
            get(routes::relationships::traverse),
        )
        .route(
            "/catalog/relationships",
            post(routes::relationships::upsert),
        )
        .route("/catalog/schemas", post(routes::schemas::register))
        .route("/catalog/schemas/{entity_type}", get(routes::schemas::list))
        .route(
            "/catalog/schemas/{entity_type}/{version}",
            get(routes::schemas::get_one),
        )
        .route("/catalog/events", get(routes::events::list))
        .route("/catalog/lineage/{id}", get(routes::lineage::get_one))
        .route(
            "/catalog/compliance/pii",
            get(routes::compliance::pii),
        )
        .route(
            "/catalog/compliance/retention",
            get(routes::compliance::retention),
        )
        .route("/catalog/stats", get(routes::stats::stats))
        .route("/query", post(routes::query::execute))
        .route("/health", get(routes::health::health))
        .route("/ready", get(routes::health::ready))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ))
        .layer(axum::middleware::from_fn(middleware::request_context))
        .with_state(state)
}
