use chrono::{DateTime, Datelike, Utc};
use dictamesh_types::{CatalogId, EventLogRecord, time::now_millis};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::Catalog;
use crate::error::CatalogError;
use crate::schema::ensure_event_partition;

const PARTITION_PREFIX: &str = "dictamesh_event_log_";

#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub catalog_id: Option<CatalogId>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<u32>,
}

/// Monthly partition table for an event timestamp,
/// `dictamesh_event_log_YYYY_MM`.
pub(crate) fn partition_name(timestamp_ms: i64) -> String {
    let date =
        DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or(DateTime::UNIX_EPOCH);
    format!("{PARTITION_PREFIX}{:04}_{:02}", date.year(), date.month())
}

impl Catalog {
    /// Append-only audit write, partitioned by event date. A duplicate
    /// `event_id` is a silent no-op and returns `false`; that is the
    /// consumer-side half of the at-least-once dedup law.
    pub fn append_event(&self, record: &EventLogRecord) -> Result<bool, CatalogError> {
        self.db.with_tx(|conn| append_event_in(conn, record))
    }

    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventLogRecord>, CatalogError> {
        let limit = filter.limit.unwrap_or(100) as usize;
        self.db.with(|conn| {
            let mut partitions = event_partitions_in(conn)?;
            // Newest partition first.
            partitions.sort();
            partitions.reverse();

            let mut out = Vec::new();
            for partition in partitions {
                if out.len() >= limit {
                    break;
                }
                let mut sql = format!(
                    "SELECT payload_json, ingested_at FROM {partition} WHERE 1 = 1"
                );
                if filter.event_type.is_some() {
                    sql.push_str(" AND event_type = :event_type");
                }
                if filter.catalog_id.is_some() {
                    sql.push_str(" AND catalog_id = :catalog_id");
                }
                if filter.from.is_some() {
                    sql.push_str(" AND event_timestamp >= :from");
                }
                if filter.to.is_some() {
                    sql.push_str(" AND event_timestamp < :to");
                }
                sql.push_str(" ORDER BY event_timestamp DESC LIMIT :limit");

                let mut stmt = conn.prepare(&sql)?;
                let mut bound: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
                if let Some(event_type) = &filter.event_type {
                    bound.push((":event_type", event_type));
                }
                if let Some(catalog_id) = &filter.catalog_id {
                    bound.push((":catalog_id", catalog_id));
                }
                if let Some(from) = &filter.from {
                    bound.push((":from", from));
                }
                if let Some(to) = &filter.to {
                    bound.push((":to", to));
                }
                let remaining = (limit - out.len()) as i64;
                bound.push((":limit", &remaining));

                let rows = stmt.query_map(bound.as_slice(), record_from_row)?;
                for row in rows {
                    out.push(row??);
                }
            }
            Ok(out)
        })
    }

    /// Partition tables currently present, oldest first.
    pub fn event_partitions(&self) -> Result<Vec<String>, CatalogError> {
        self.db.with(|conn| {
            let mut partitions = event_partitions_in(conn)?;
            partitions.sort();
            Ok(partitions)
        })
    }

    /// Archive whole partitions older than the cutoff by dropping their
    /// tables. The dedup index keeps the archived event ids.
    pub fn archive_partitions_before(&self, cutoff_ms: i64) -> Result<u32, CatalogError> {
        let cutoff = partition_name(cutoff_ms);
        self.db.with_tx(|conn| {
            let mut dropped = 0u32;
            for partition in event_partitions_in(conn)? {
                if partition < cutoff {
                    conn.execute_batch(&format!("DROP TABLE {partition}"))?;
                    tracing::info!(partition = %partition, "event log partition archived");
                    dropped += 1;
                }
            }
            Ok(dropped)
        })
    }
}

/// Transactional insert used both directly and from the fabric consumer.
/// Returns `false` without side effects when the event id was seen before.
pub(crate) fn append_event_in(
    conn: &Connection,
    record: &EventLogRecord,
) -> Result<bool, CatalogError> {
    let seen: Option<String> = conn
        .query_row(
            "SELECT partition_name FROM dictamesh_event_ids WHERE event_id = ?1",
            params![record.event_id],
            |row| row.get(0),
        )
        .optional()?;
    if seen.is_some() {
        return Ok(false);
    }

    let partition = partition_name(record.event_timestamp);
    ensure_event_partition(conn, &partition)?;

    let changed_fields_json = serde_json::to_string(&record.changed_fields)?;
    let payload_json = serde_json::to_string(&record)?;
    conn.execute(
        &format!(
            "INSERT INTO {partition} (
                event_id, event_type, catalog_id, entity_type,
                changed_fields_json, payload_json, trace_id, span_id,
                event_timestamp, ingested_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            record.event_id,
            record.event_type.as_str(),
            record.catalog_id,
            record.entity_type,
            changed_fields_json,
            payload_json,
            record.trace_id.as_str(),
            record.span_id.as_str(),
            record.event_timestamp,
            record.ingested_at,
        ],
    )?;
    conn.execute(
        "INSERT INTO dictamesh_event_ids (event_id, partition_name, ingested_at)
         VALUES (?1, ?2, ?3)",
        params![record.event_id, partition, now_millis()],
    )?;
    Ok(true)
}

pub(crate) fn event_partitions_in(conn: &Connection) -> Result<Vec<String>, CatalogError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ORDER BY name",
    )?;
    let rows = stmt.query_map(params![format!("{PARTITION_PREFIX}%")], |row| {
        row.get::<_, String>(0)
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Oldest retained event timestamp for one catalog entry, if any.
pub(crate) fn oldest_event_for(
    conn: &Connection,
    catalog_id: &CatalogId,
) -> Result<Option<i64>, CatalogError> {
    let mut oldest: Option<i64> = None;
    for partition in event_partitions_in(conn)? {
        let candidate: Option<i64> = conn
            .query_row(
                &format!("SELECT MIN(event_timestamp) FROM {partition} WHERE catalog_id = ?1"),
                params![catalog_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        oldest = match (oldest, candidate) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    Ok(oldest)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Result<EventLogRecord, CatalogError>> {
    let payload_json: String = row.get(0)?;
    Ok(serde_json::from_str(&payload_json).map_err(CatalogError::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dictamesh_types::{
        EntityPointer, EventEnvelope, EventId, EventType, TraceContext,
    };
    use std::collections::BTreeMap;

    pub(crate) fn record(event_id: &str, timestamp: i64) -> EventLogRecord {
        let trace = TraceContext::root();
        EventLogRecord {
            event_id: EventId::new(event_id),
            event_type: EventType::EntityCreated,
            catalog_id: Some(CatalogId::new("ce-1")),
            entity_type: "customer".into(),
            changed_fields: vec![],
            payload: EventEnvelope {
                event_id: EventId::new(event_id),
                event_type: EventType::EntityCreated,
                timestamp,
                source_system: "directus".into(),
                domain: "customers".into(),
                entity: EntityPointer {
                    entity_type: "customer".into(),
                    id: "c-1".into(),
                    version: 1,
                    url: "https://api.directus.example/items/customer/{id}".into(),
                    etag: None,
                },
                changed_fields: vec![],
                relationships: vec![],
                metadata: BTreeMap::new(),
                trace_context: trace.clone(),
            },
            trace_id: trace.trace_id.clone(),
            span_id: trace.span_id.clone(),
            event_timestamp: timestamp,
            ingested_at: timestamp,
        }
    }

    #[test]
    fn partition_names_are_monthly() {
        // 2026-08-01T00:00:00Z
        assert_eq!(partition_name(1_785_542_400_000), "dictamesh_event_log_2026_08");
        // Epoch start.
        assert_eq!(partition_name(0), "dictamesh_event_log_1970_01");
    }

    #[test]
    fn duplicate_event_id_is_a_silent_no_op() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        assert!(catalog.append_event(&record("e-42", 1_000)).expect("first"));
        assert!(
            !catalog.append_event(&record("e-42", 1_000)).expect("dup"),
            "second append of the same event id should be a no-op"
        );

        let events = catalog
            .list_events(&EventFilter::default())
            .expect("list events");
        assert_eq!(events.len(), 1, "exactly one row in the event log");
    }

    #[test]
    fn events_spread_across_monthly_partitions() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let january = 1_736_000_000_000; // 2025-01
        let june = 1_749_000_000_000; // 2025-06
        catalog.append_event(&record("e-1", january)).expect("jan");
        catalog.append_event(&record("e-2", june)).expect("jun");

        let partitions = catalog.event_partitions().expect("partitions");
        assert_eq!(
            partitions,
            vec![
                "dictamesh_event_log_2025_01".to_string(),
                "dictamesh_event_log_2025_06".to_string()
            ]
        );
    }

    #[test]
    fn archive_drops_old_partitions_only() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let january = 1_736_000_000_000;
        let june = 1_749_000_000_000;
        catalog.append_event(&record("e-1", january)).expect("jan");
        catalog.append_event(&record("e-2", june)).expect("jun");

        let dropped = catalog.archive_partitions_before(june).expect("archive");
        assert_eq!(dropped, 1);
        let partitions = catalog.event_partitions().expect("partitions");
        assert_eq!(partitions, vec!["dictamesh_event_log_2025_06".to_string()]);

        // Dedup memory survives archival.
        assert!(
            !catalog.append_event(&record("e-1", january)).expect("redo"),
            "archived event ids still dedup"
        );
    }

    #[test]
    fn list_events_filters_by_type_and_entry() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        catalog.append_event(&record("e-1", 1_000)).expect("append");
        let mut other = record("e-2", 2_000);
        other.event_type = EventType::EntityArchived;
        other.catalog_id = Some(CatalogId::new("ce-2"));
        catalog.append_event(&other).expect("append");

        let by_type = catalog
            .list_events(&EventFilter {
                event_type: Some("entity.archived".into()),
                ..EventFilter::default()
            })
            .expect("filter by type");
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].event_id.as_str(), "e-2");

        let by_entry = catalog
            .list_events(&EventFilter {
                catalog_id: Some(CatalogId::new("ce-1")),
                ..EventFilter::default()
            })
            .expect("filter by entry");
        assert_eq!(by_entry.len(), 1);
        assert_eq!(by_entry[0].event_id.as_str(), "e-1");
    }
}
