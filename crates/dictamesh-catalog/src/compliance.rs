use dictamesh_types::CatalogEntry;
use rusqlite::params;
use serde::Serialize;

use crate::Catalog;
use crate::entities::entry_from_row;
use crate::error::CatalogError;
use crate::events::oldest_event_for;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// A catalog entry holding data past its declared retention.
#[derive(Serialize, Clone, Debug)]
pub struct RetentionViolation {
    pub entry: CatalogEntry,
    /// Timestamp of the oldest retained data for this entry; falls back to
    /// the entry's own creation time when no event was logged.
    pub oldest_data_at: i64,
    pub overdue_ms: i64,
}

impl Catalog {
    /// Non-archived entries flagged as PII.
    pub fn list_pii_entities(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    id, entity_type, domain, source_system, source_entity_id,
                    access_url_template, access_method, access_auth, schema_version,
                    sla_availability_pct, sla_p99_latency_ms, sla_freshness_seconds,
                    pii, classification, retention_days, status,
                    created_at, updated_at, last_seen_at
                 FROM dictamesh_entities
                 WHERE pii = 1 AND status != 'archived'
                 ORDER BY entity_type, source_entity_id",
            )?;
            let rows = stmt.query_map([], entry_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Entries whose oldest live data breaches `now - retention`. The
    /// catalog signals; it never deletes user data itself.
    pub fn list_retention_violations(
        &self,
        now: i64,
    ) -> Result<Vec<RetentionViolation>, CatalogError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    id, entity_type, domain, source_system, source_entity_id,
                    access_url_template, access_method, access_auth, schema_version,
                    sla_availability_pct, sla_p99_latency_ms, sla_freshness_seconds,
                    pii, classification, retention_days, status,
                    created_at, updated_at, last_seen_at
                 FROM dictamesh_entities
                 WHERE retention_days IS NOT NULL AND status != 'archived'",
            )?;
            let rows = stmt.query_map(params![], entry_from_row)?;

            let mut violations = Vec::new();
            for row in rows {
                let entry = row?;
                let Some(retention_days) = entry.classification.retention_days else {
                    continue;
                };
                let oldest_data_at = oldest_event_for(conn, &entry.id)?
                    .unwrap_or(entry.created_at);
                let horizon = now - (retention_days as i64) * DAY_MS;
                if oldest_data_at < horizon {
                    violations.push(RetentionViolation {
                        overdue_ms: horizon - oldest_data_at,
                        oldest_data_at,
                        entry,
                    });
                }
            }
            Ok(violations)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::registration;
    use dictamesh_types::time::now_millis;

    #[test]
    fn pii_listing_skips_archived_entries() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let mut pii = registration("c-1", "customer");
        pii.classification.pii = true;
        pii.classification.class = Some("personal".into());
        let kept = catalog.register_entity(&pii).expect("register");

        let mut archived = registration("c-2", "customer");
        archived.classification.pii = true;
        archived.classification.class = Some("personal".into());
        let gone = catalog.register_entity(&archived).expect("register");
        catalog.archive_entity(&gone.entry.id).expect("archive");

        catalog
            .register_entity(&registration("o-1", "order"))
            .expect("non-pii");

        let pii_entries = catalog.list_pii_entities().expect("pii listing");
        assert_eq!(pii_entries.len(), 1);
        assert_eq!(pii_entries[0].id, kept.entry.id);
    }

    #[test]
    fn retention_violations_trip_after_the_window() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let mut reg = registration("c-1", "customer");
        reg.classification.retention_days = Some(30);
        let outcome = catalog.register_entity(&reg).expect("register");

        let now = now_millis();
        assert!(
            catalog
                .list_retention_violations(now)
                .expect("no violation yet")
                .is_empty()
        );

        // 31 days later the entry is overdue.
        let later = now + 31 * DAY_MS;
        let violations = catalog
            .list_retention_violations(later)
            .expect("violations");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].entry.id, outcome.entry.id);
        assert!(violations[0].overdue_ms > 0);
    }

    #[test]
    fn entries_without_retention_never_violate() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        catalog
            .register_entity(&registration("c-1", "customer"))
            .expect("register");
        let far_future = now_millis() + 10_000 * DAY_MS;
        assert!(
            catalog
                .list_retention_violations(far_future)
                .expect("violations")
                .is_empty()
        );
    }
}
