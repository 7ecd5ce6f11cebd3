//! End-to-end flows across the whole mesh: adapter change streams into
//! the fabric, the catalog consumer, temporal relationships, breaker
//! recovery, consumer-side dedup, and the retention signal.

use dictamesh_catalog::{RelationshipUpsert, RetentionSweeper, RetentionSweeperConfig};
use dictamesh_fabric::{TOPIC_ENTITY_CHANGED, TOPIC_SYSTEM_EVENTS};
use dictamesh_gateway::{FieldDef, SchemaFragment, TypeDef};
use dictamesh_runtime::{
    BreakerState, ChangeStream, MemoryAdapter, MemorySharedCache, ResilientAdapterConfig,
    SourceAdapter,
};
use dictamesh_types::{
    Cardinality, EntryStatus, EventType, MeshError, Predicate, RelationshipDirection,
    RequestContext, time::now_millis,
};
use dictamesh_web::{Config, Mesh, build_mesh};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

async fn mesh() -> Mesh {
    build_mesh(&Config::default()).await.expect("mesh")
}

async fn register_customer_adapter(mesh: &Mesh) -> Arc<MemoryAdapter> {
    let adapter = Arc::new(MemoryAdapter::new("customers", "directus", "customer"));
    let stream = adapter.stream_changes();
    mesh.registry
        .register(
            Arc::clone(&adapter) as Arc<dyn SourceAdapter>,
            Some(stream),
            ResilientAdapterConfig::default(),
            Arc::new(MemorySharedCache::new()),
            mesh.catalog.clone(),
            mesh.publisher.clone(),
        )
        .await
        .expect("register adapter");
    mesh.gateway
        .register_subgraph(SchemaFragment {
            domain: "customers".into(),
            types: vec![TypeDef {
                name: "customer".into(),
                key_field: "id".into(),
                fields: vec![FieldDef::scalar("id"), FieldDef::scalar("name")],
            }],
        })
        .expect("subgraph");
    adapter
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entity_creation_propagates_to_catalog_and_gateway() {
    let mesh = mesh().await;
    let adapter = register_customer_adapter(&mesh).await;

    adapter.put("c-1", json!({"id": "c-1", "name": "Ada"}));

    // The change event lands on entity.changed.
    wait_until("entity.changed record", || {
        mesh.broker.lag("probe", TOPIC_ENTITY_CHANGED).unwrap_or(0) >= 1
    })
    .await;

    // The catalog consumer applies it: a row with the source identity.
    let catalog = mesh.catalog.clone();
    wait_until("catalog row", || {
        catalog.find_by_source("directus", "c-1", "customer").is_ok()
    })
    .await;
    let entry = mesh
        .catalog
        .find_by_source("directus", "c-1", "customer")
        .expect("registered entry");
    assert_eq!(entry.status, EntryStatus::Active);
    assert_eq!(entry.identity.domain, "customers");

    // And one audit row exists for it.
    let events = mesh
        .catalog
        .list_events(&dictamesh_catalog::EventFilter::default())
        .expect("event log");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::EntityCreated);

    // The gateway resolves the entity through the adapter.
    let ctx = RequestContext::new("req-e2e-1");
    let response = mesh
        .gateway
        .execute(
            &json!({"query": {"field": "customer", "arguments": {"id": "c-1"}, "select": ["id"]}}),
            &ctx,
        )
        .await
        .expect("gateway query");
    assert!(response.errors.is_empty());
    assert_eq!(response.data["id"], json!("c-1"));

    mesh.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn temporal_relationship_replacement() {
    let mesh = mesh().await;
    let adapter = register_customer_adapter(&mesh).await;
    adapter.put("order-1", json!({"id": "order-1"}));
    adapter.put("address-a", json!({"id": "address-a"}));
    adapter.put("address-b", json!({"id": "address-b"}));

    let catalog = &mesh.catalog;
    wait_until("rows applied", || {
        catalog
            .find_by_source("directus", "address-b", "customer")
            .is_ok()
    })
    .await;

    let order = catalog
        .find_by_source("directus", "order-1", "customer")
        .expect("order row");
    let address_a = catalog
        .find_by_source("directus", "address-a", "customer")
        .expect("address-a row");
    let address_b = catalog
        .find_by_source("directus", "address-b", "customer")
        .expect("address-b row");

    let ships_to = |object: &dictamesh_types::CatalogId| RelationshipUpsert {
        subject_id: order.id.clone(),
        predicate: Predicate {
            relationship_type: "ships_to".into(),
            cardinality: Cardinality::OneToOne,
        },
        object_id: object.clone(),
        subject_name: None,
        object_name: None,
        metadata: BTreeMap::new(),
    };

    catalog
        .upsert_relationship(&ships_to(&address_a.id))
        .expect("first edge");
    let second = catalog
        .upsert_relationship(&ships_to(&address_b.id))
        .expect("replacement edge");

    let closed = second.closed.expect("first edge closed");
    assert_eq!(closed.object_id, address_a.id);
    assert_eq!(closed.valid_to, Some(second.current.valid_from));
    assert_eq!(second.current.valid_to, None);

    let current = catalog
        .relationships_for(&order.id, RelationshipDirection::Outgoing)
        .expect("current edges");
    assert_eq!(current.len(), 1, "only the replacement is current");
    assert_eq!(current[0].object_id, address_b.id);

    mesh.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn breaker_opens_and_recovers_on_registered_adapter() {
    let mesh = mesh().await;
    let adapter = Arc::new(MemoryAdapter::new("inventory", "warehouse", "stock_item"));
    adapter.put("s-1", json!({"id": "s-1"}));
    let mut config = ResilientAdapterConfig::default();
    config.retry.max_attempts = 1;
    config.breaker.open_timeout = Duration::from_millis(200);
    mesh.registry
        .register(
            Arc::clone(&adapter) as Arc<dyn SourceAdapter>,
            None,
            config,
            Arc::new(MemorySharedCache::new()),
            mesh.catalog.clone(),
            mesh.publisher.clone(),
        )
        .await
        .expect("register");
    let registered = mesh.registry.by_entity_type("stock_item").expect("adapter");

    adapter.inject_faults((0..5).map(|_| MeshError::Timeout { elapsed_ms: 10 }));
    let ctx = RequestContext::new("req-e2e-4");
    for _ in 0..5 {
        registered
            .adapter
            .get_entity(&ctx, "c-99")
            .await
            .expect_err("injected timeout");
    }
    assert_eq!(registered.adapter.breaker_state(), BreakerState::Open);

    let err = registered
        .adapter
        .get_entity(&ctx, "c-99")
        .await
        .expect_err("short-circuited");
    assert!(matches!(err, MeshError::CircuitOpen { .. }));

    tokio::time::sleep(Duration::from_millis(250)).await;
    registered
        .adapter
        .get_entity(&ctx, "s-1")
        .await
        .expect("probe succeeds");
    assert_eq!(registered.adapter.breaker_state(), BreakerState::Closed);

    mesh.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_event_id_applies_once() {
    let mesh = mesh().await;
    let adapter = register_customer_adapter(&mesh).await;

    let envelope = adapter.put("c-42", json!({"id": "c-42"}));
    // A redelivery of the same logical event.
    mesh.producer
        .publish(TOPIC_ENTITY_CHANGED, envelope.clone())
        .await
        .expect("replay publish");

    let catalog = mesh.catalog.clone();
    wait_until("catalog row", || {
        catalog.find_by_source("directus", "c-42", "customer").is_ok()
    })
    .await;
    wait_until("consumer drained", || mesh.catalog_lag() == 0).await;

    let events = mesh
        .catalog
        .list_events(&dictamesh_catalog::EventFilter::default())
        .expect("event log");
    assert_eq!(events.len(), 1, "one row in the event log");
    assert_eq!(events[0].event_id, envelope.event_id);

    mesh.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retention_breach_signals_without_deleting() {
    let mesh = mesh().await;

    // An unregistered source: its envelope goes through the consumer
    // path by hand, carrying a 30-day retention.
    let source = MemoryAdapter::new("customers", "directus", "customer");
    let envelope = {
        let mut envelope = source.put("c-9", json!({"id": "c-9"}));
        envelope.metadata.insert("retention_days".into(), "30".into());
        envelope
    };
    mesh.catalog
        .apply_envelope(&envelope)
        .expect("apply with retention");

    let sweeper = RetentionSweeper::new(
        mesh.catalog.clone(),
        Arc::clone(&mesh.producer),
        RetentionSweeperConfig::default(),
    );
    let emitted = sweeper
        .sweep_once(now_millis() + 31 * DAY_MS)
        .await
        .expect("sweep");
    assert_eq!(emitted, 1, "one deletion-due signal");

    // The signal is on system.events and the row is untouched.
    let partitions = mesh
        .broker
        .partition_count(TOPIC_SYSTEM_EVENTS)
        .expect("partitions");
    let mut signals = Vec::new();
    for partition in 0..partitions {
        signals.extend(
            mesh.broker
                .fetch(TOPIC_SYSTEM_EVENTS, partition, 0, 64)
                .expect("fetch"),
        );
    }
    let deletion_due: Vec<_> = signals
        .iter()
        .filter(|r| r.envelope.event_type == EventType::RetentionDeletionDue)
        .collect();
    assert_eq!(deletion_due.len(), 1);
    assert_eq!(deletion_due[0].envelope.entity.id, "c-9");

    let entry = mesh
        .catalog
        .find_by_source("directus", "c-9", "customer")
        .expect("row still present");
    assert_eq!(entry.status, EntryStatus::Active);

    mesh.shutdown().await;
}
