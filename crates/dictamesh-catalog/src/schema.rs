use rusqlite::Connection;

use crate::db::Db;
use crate::error::CatalogError;

const DB_SCHEMA_VERSION: i64 = 1;

pub(crate) fn init(db: &Db) -> Result<(), CatalogError> {
    db.with(|conn| {
        let user_version: i64 = conn
            .query_row("SELECT user_version FROM pragma_user_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| CatalogError::Storage(format!("read sqlite user_version: {e}")))?;

        if user_version > DB_SCHEMA_VERSION {
            return Err(CatalogError::Storage(format!(
                "database schema version {user_version} is newer than supported {DB_SCHEMA_VERSION}"
            )));
        }

        conn.execute_batch(managed_schema_sql())
            .map_err(|e| CatalogError::Storage(format!("ensure schema: {e}")))?;

        if user_version < DB_SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", DB_SCHEMA_VERSION)
                .map_err(|e| CatalogError::Storage(format!("set sqlite user_version: {e}")))?;
        }
        Ok(())
    })
}

/// DDL for one monthly event-log partition; the name is derived from the
/// event timestamp, `dictamesh_event_log_YYYY_MM`.
pub(crate) fn ensure_event_partition(
    conn: &Connection,
    partition: &str,
) -> Result<(), CatalogError> {
    debug_assert!(
        partition.starts_with("dictamesh_event_log_"),
        "invariant violated: partition name must carry the event log prefix, got {partition}"
    );
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {partition} (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            catalog_id TEXT,
            entity_type TEXT NOT NULL,
            changed_fields_json TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            trace_id TEXT NOT NULL,
            span_id TEXT NOT NULL,
            event_timestamp INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{partition}_catalog
            ON {partition} (catalog_id, event_timestamp);
        ",
    ))
    .map_err(|e| CatalogError::Storage(format!("ensure event partition {partition}: {e}")))
}

fn managed_schema_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS dictamesh_entities (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        domain TEXT NOT NULL,
        source_system TEXT NOT NULL,
        source_entity_id TEXT NOT NULL,
        access_url_template TEXT NOT NULL,
        access_method TEXT NOT NULL,
        access_auth TEXT NOT NULL,
        schema_version INTEGER,
        sla_availability_pct REAL NOT NULL,
        sla_p99_latency_ms INTEGER NOT NULL,
        sla_freshness_seconds INTEGER NOT NULL,
        pii INTEGER NOT NULL DEFAULT 0,
        classification TEXT,
        retention_days INTEGER,
        status TEXT NOT NULL DEFAULT 'active'
            CHECK (status IN ('active', 'deprecated', 'archived')),
        search_text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL,
        UNIQUE (source_system, source_entity_id, entity_type)
    );
    CREATE INDEX IF NOT EXISTS idx_dictamesh_entities_type
        ON dictamesh_entities (entity_type);
    CREATE INDEX IF NOT EXISTS idx_dictamesh_entities_domain
        ON dictamesh_entities (domain);
    CREATE INDEX IF NOT EXISTS idx_dictamesh_entities_status
        ON dictamesh_entities (status);
    CREATE INDEX IF NOT EXISTS idx_dictamesh_entities_search
        ON dictamesh_entities (search_text);
    CREATE INDEX IF NOT EXISTS idx_dictamesh_entities_pii
        ON dictamesh_entities (pii) WHERE pii = 1;

    CREATE TABLE IF NOT EXISTS dictamesh_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        cardinality TEXT NOT NULL
            CHECK (cardinality IN ('one_to_one', 'one_to_many', 'many_to_many')),
        object_id TEXT NOT NULL,
        subject_name TEXT,
        object_name TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        valid_from INTEGER NOT NULL,
        valid_to INTEGER,
        CHECK (valid_to IS NULL OR valid_to > valid_from)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_dictamesh_relationships_current
        ON dictamesh_relationships (subject_id, relationship_type, object_id)
        WHERE valid_to IS NULL;
    CREATE INDEX IF NOT EXISTS idx_dictamesh_relationships_subject
        ON dictamesh_relationships (subject_id) WHERE valid_to IS NULL;
    CREATE INDEX IF NOT EXISTS idx_dictamesh_relationships_object
        ON dictamesh_relationships (object_id) WHERE valid_to IS NULL;

    CREATE TABLE IF NOT EXISTS dictamesh_schemas (
        entity_type TEXT NOT NULL,
        version INTEGER NOT NULL,
        format TEXT NOT NULL
            CHECK (format IN ('avro', 'json-schema', 'protobuf', 'graphql')),
        definition TEXT NOT NULL,
        backward_compatible INTEGER NOT NULL DEFAULT 1,
        forward_compatible INTEGER NOT NULL DEFAULT 0,
        registered_at INTEGER NOT NULL,
        deprecated_at INTEGER,
        retired_at INTEGER,
        PRIMARY KEY (entity_type, version)
    );

    CREATE TABLE IF NOT EXISTS dictamesh_lineage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        upstream_id TEXT NOT NULL,
        downstream_id TEXT NOT NULL,
        transformation TEXT NOT NULL
            CHECK (transformation IN ('copy', 'aggregate', 'join', 'enrich', 'filter')),
        description TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        last_flow_at INTEGER NOT NULL,
        avg_latency_ms INTEGER
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_dictamesh_lineage_active
        ON dictamesh_lineage (upstream_id, downstream_id, transformation)
        WHERE active = 1;
    CREATE INDEX IF NOT EXISTS idx_dictamesh_lineage_downstream
        ON dictamesh_lineage (downstream_id) WHERE active = 1;

    CREATE TABLE IF NOT EXISTS dictamesh_cache_status (
        catalog_id TEXT NOT NULL,
        layer TEXT NOT NULL CHECK (layer IN ('L1', 'L2', 'L3')),
        cache_key TEXT NOT NULL,
        cached_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        hit_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (catalog_id, layer)
    );

    CREATE TABLE IF NOT EXISTS dictamesh_event_ids (
        event_id TEXT PRIMARY KEY,
        partition_name TEXT NOT NULL,
        ingested_at INTEGER NOT NULL
    );
    "
}
