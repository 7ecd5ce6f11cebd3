use async_trait::async_trait;
use dictamesh_fabric::{EventHandler, HandlerError, StoredRecord};
use dictamesh_types::{
    AccessDescriptor, AuthKind, Cardinality, CatalogId, Classification, EntityRef, EventEnvelope,
    EventLogRecord, EventType, HttpMethod, Predicate, SchemaFormat, Sla, time::now_millis,
};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;

use crate::Catalog;
use crate::entities::{EntityRegistration, register_entity_in};
use crate::error::CatalogError;
use crate::events::append_event_in;
use crate::relationships::{RelationshipUpsert, upsert_relationship_in};

/// The catalog's consumer-group member: applies change envelopes to the
/// store. Every applied event writes its audit row in the same
/// transaction as the state change, and a replayed `event_id` applies
/// nothing.
pub struct CatalogEventHandler {
    catalog: Catalog,
}

impl CatalogEventHandler {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl EventHandler for CatalogEventHandler {
    async fn handle(&self, record: &StoredRecord) -> Result<(), HandlerError> {
        let catalog = self.catalog.clone();
        let envelope = record.envelope.clone();
        let applied = tokio::task::spawn_blocking(move || catalog.apply_envelope(&envelope))
            .await
            .map_err(|e| HandlerError::Fatal(format!("apply task: {e}")))?;
        match applied {
            Ok(_) => Ok(()),
            // Malformed envelopes can never apply; storage trouble can.
            Err(err @ CatalogError::InvalidInput(_)) => Err(HandlerError::Fatal(err.to_string())),
            Err(err @ CatalogError::IncompatibleSchema { .. }) => {
                Err(HandlerError::Fatal(err.to_string()))
            }
            Err(err) => Err(HandlerError::Retryable(err.to_string())),
        }
    }
}

impl Catalog {
    /// Apply one envelope: dedup by `event_id`, mutate catalog state per
    /// the event type, and append the audit row, all in one transaction.
    /// Returns `false` when the event was a replay.
    pub fn apply_envelope(&self, envelope: &EventEnvelope) -> Result<bool, CatalogError> {
        self.db.with_tx(|conn| {
            let catalog_id = apply_side_effects(conn, envelope)?;
            let record = EventLogRecord {
                event_id: envelope.event_id.clone(),
                event_type: envelope.event_type,
                catalog_id,
                entity_type: envelope.entity.entity_type.clone(),
                changed_fields: envelope.changed_fields.clone(),
                payload: envelope.clone(),
                trace_id: envelope.trace_context.trace_id.clone(),
                span_id: envelope.trace_context.span_id.clone(),
                event_timestamp: envelope.timestamp,
                ingested_at: now_millis(),
            };
            // The dedup check sits inside append_event_in; a replay means
            // the side effects above were also skipped.
            append_event_in(conn, &record)
        })
    }
}

/// State change for one envelope. Returns the catalog id the audit row
/// should reference. Runs before the dedup write, so replays must be
/// filtered by the caller first.
fn apply_side_effects(
    conn: &Connection,
    envelope: &EventEnvelope,
) -> Result<Option<CatalogId>, CatalogError> {
    // Replay guard: skip side effects when the event id is already logged.
    let seen: Option<String> = conn
        .query_row(
            "SELECT partition_name FROM dictamesh_event_ids WHERE event_id = ?1",
            params![envelope.event_id],
            |row| row.get(0),
        )
        .optional()?;
    if seen.is_some() {
        return Ok(None);
    }

    match envelope.event_type {
        EventType::EntityCreated | EventType::EntityUpdated => {
            let outcome = register_entity_in(conn, &registration_from(envelope))?;
            Ok(Some(outcome.entry.id))
        }
        EventType::EntityDeleted | EventType::EntityArchived => {
            let id: Option<CatalogId> = conn
                .query_row(
                    "SELECT id FROM dictamesh_entities
                     WHERE source_system = ?1 AND source_entity_id = ?2 AND entity_type = ?3",
                    params![
                        envelope.source_system,
                        envelope.entity.id,
                        envelope.entity.entity_type
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = &id {
                conn.execute(
                    "UPDATE dictamesh_entities SET status = 'archived', updated_at = ?1
                     WHERE id = ?2 AND status != 'archived'",
                    params![now_millis(), id],
                )?;
            }
            Ok(id)
        }
        EventType::RelationshipCreated => {
            let subject = ensure_entry(conn, envelope, &envelope.entity.entity_type, &envelope.entity.id)?;
            for related in &envelope.relationships {
                let object = ensure_entry(conn, envelope, &related.entity_type, &related.id)?;
                upsert_relationship_in(
                    conn,
                    &RelationshipUpsert {
                        subject_id: subject.clone(),
                        predicate: Predicate {
                            relationship_type: related.relationship_type.clone(),
                            cardinality: Cardinality::OneToMany,
                        },
                        object_id: object,
                        subject_name: None,
                        object_name: None,
                        metadata: BTreeMap::new(),
                    },
                )?;
            }
            Ok(Some(subject))
        }
        EventType::RelationshipDeleted => {
            let subject: Option<CatalogId> = conn
                .query_row(
                    "SELECT id FROM dictamesh_entities
                     WHERE source_system = ?1 AND source_entity_id = ?2 AND entity_type = ?3",
                    params![
                        envelope.source_system,
                        envelope.entity.id,
                        envelope.entity.entity_type
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(subject) = subject else {
                return Ok(None);
            };
            let now = now_millis();
            for related in &envelope.relationships {
                let object: Option<CatalogId> = conn
                    .query_row(
                        "SELECT id FROM dictamesh_entities
                         WHERE source_system = ?1 AND source_entity_id = ?2 AND entity_type = ?3",
                        params![envelope.source_system, related.id, related.entity_type],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(object) = object {
                    // Closing, never deleting.
                    conn.execute(
                        "UPDATE dictamesh_relationships SET valid_to = ?1
                         WHERE subject_id = ?2 AND relationship_type = ?3 AND object_id = ?4
                           AND valid_to IS NULL AND valid_from < ?1",
                        params![now, subject, related.relationship_type, object],
                    )?;
                }
            }
            Ok(Some(subject))
        }
        EventType::SchemaRegistered => {
            apply_schema_registration(conn, envelope)?;
            Ok(None)
        }
        // Routing-only events: audited, no catalog mutation.
        EventType::SchemaDeprecated
        | EventType::CacheInvalidated
        | EventType::AdapterRegistered
        | EventType::AdapterStarted
        | EventType::AdapterStopped
        | EventType::HealthChanged
        | EventType::RetentionDeletionDue => Ok(None),
    }
}

/// First-seen registration path for envelopes: the pointer block plus
/// routing metadata is enough for a catalog row.
fn registration_from(envelope: &EventEnvelope) -> EntityRegistration {
    let metadata = &envelope.metadata;
    let pii = metadata.get("pii").is_some_and(|v| v == "true");
    EntityRegistration {
        identity: EntityRef {
            entity_type: envelope.entity.entity_type.clone(),
            domain: envelope.domain.clone(),
            source_system: envelope.source_system.clone(),
            source_entity_id: envelope.entity.id.clone(),
        },
        access: AccessDescriptor {
            url_template: envelope.entity.url.clone(),
            method: HttpMethod::Get,
            auth: AuthKind::Bearer,
        },
        schema_version: u32::try_from(envelope.entity.version).ok(),
        sla: Sla {
            availability_pct: 99.0,
            p99_latency_ms: 1_000,
            freshness_seconds: 3_600,
        },
        classification: Classification {
            pii,
            class: metadata.get("classification").cloned().or(if pii {
                Some("personal".into())
            } else {
                None
            }),
            retention_days: metadata
                .get("retention_days")
                .and_then(|v| v.parse().ok()),
        },
    }
}

fn ensure_entry(
    conn: &Connection,
    envelope: &EventEnvelope,
    entity_type: &str,
    source_entity_id: &str,
) -> Result<CatalogId, CatalogError> {
    let existing: Option<CatalogId> = conn
        .query_row(
            "SELECT id FROM dictamesh_entities
             WHERE source_system = ?1 AND source_entity_id = ?2 AND entity_type = ?3",
            params![envelope.source_system, source_entity_id, entity_type],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let mut registration = registration_from(envelope);
    registration.identity.entity_type = entity_type.to_string();
    registration.identity.source_entity_id = source_entity_id.to_string();
    registration.access.url_template = envelope
        .entity
        .url
        .replace(&envelope.entity.entity_type, entity_type);
    Ok(register_entity_in(conn, &registration)?.entry.id)
}

fn apply_schema_registration(
    conn: &Connection,
    envelope: &EventEnvelope,
) -> Result<(), CatalogError> {
    let Some(definition) = envelope.metadata.get("definition") else {
        // Pointer-only schema events audit without registering a body.
        return Ok(());
    };
    let format = envelope
        .metadata
        .get("format")
        .and_then(|f| SchemaFormat::parse(f))
        .unwrap_or(SchemaFormat::JsonSchema);
    let version = u32::try_from(envelope.entity.version).unwrap_or(1);

    let exists: Option<u32> = conn
        .query_row(
            "SELECT version FROM dictamesh_schemas WHERE entity_type = ?1 AND version = ?2",
            params![envelope.entity.entity_type, version],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO dictamesh_schemas (
            entity_type, version, format, definition,
            backward_compatible, forward_compatible, registered_at
         ) VALUES (?1, ?2, ?3, ?4, 1, 0, ?5)",
        params![
            envelope.entity.entity_type,
            version,
            format.as_str(),
            definition,
            now_millis(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dictamesh_types::{EntityPointer, EntryStatus, EventId, RelatedRef, TraceContext};

    fn envelope(event_id: &str, event_type: EventType, entity_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(event_id),
            event_type,
            timestamp: now_millis(),
            source_system: "directus".into(),
            domain: "customers".into(),
            entity: EntityPointer {
                entity_type: "customer".into(),
                id: entity_id.into(),
                version: 1,
                url: "https://api.directus.example/items/customer/{id}".into(),
                etag: None,
            },
            changed_fields: vec![],
            relationships: vec![],
            metadata: BTreeMap::new(),
            trace_context: TraceContext::root(),
        }
    }

    #[test]
    fn entity_created_registers_and_audits() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let applied = catalog
            .apply_envelope(&envelope("e-1", EventType::EntityCreated, "c-1"))
            .expect("apply");
        assert!(applied);

        let entry = catalog
            .find_by_source("directus", "c-1", "customer")
            .expect("registered entry");
        assert_eq!(entry.status, EntryStatus::Active);

        let events = catalog
            .list_events(&crate::events::EventFilter::default())
            .expect("event log");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn replayed_event_changes_nothing() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let first = envelope("e-42", EventType::EntityCreated, "c-1");
        assert!(catalog.apply_envelope(&first).expect("first apply"));

        let entry_before = catalog
            .find_by_source("directus", "c-1", "customer")
            .expect("entry");

        assert!(
            !catalog.apply_envelope(&first).expect("replay apply"),
            "replay should be a no-op"
        );
        let entry_after = catalog
            .find_by_source("directus", "c-1", "customer")
            .expect("entry");
        assert_eq!(
            entry_after.updated_at, entry_before.updated_at,
            "exactly one downstream state change"
        );
        let events = catalog
            .list_events(&crate::events::EventFilter::default())
            .expect("event log");
        assert_eq!(events.len(), 1, "exactly one event log row");
    }

    #[test]
    fn relationship_created_links_entries() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let mut env = envelope("e-1", EventType::RelationshipCreated, "o-1");
        env.entity.entity_type = "order".into();
        env.relationships.push(RelatedRef {
            entity_type: "customer".into(),
            id: "c-1".into(),
            relationship_type: "placed_by".into(),
        });
        catalog.apply_envelope(&env).expect("apply");

        let order = catalog
            .find_by_source("directus", "o-1", "order")
            .expect("order auto-registered");
        let customer = catalog
            .find_by_source("directus", "c-1", "customer")
            .expect("customer auto-registered");

        let edges = catalog
            .relationships_for(&order.id, dictamesh_types::RelationshipDirection::Outgoing)
            .expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].object_id, customer.id);
        assert_eq!(edges[0].predicate.relationship_type, "placed_by");
    }

    #[test]
    fn entity_archived_soft_deletes() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        catalog
            .apply_envelope(&envelope("e-1", EventType::EntityCreated, "c-1"))
            .expect("create");
        catalog
            .apply_envelope(&envelope("e-2", EventType::EntityArchived, "c-1"))
            .expect("archive");

        let entry = catalog
            .find_by_source("directus", "c-1", "customer")
            .expect("entry survives archival");
        assert_eq!(entry.status, EntryStatus::Archived);
    }
}
