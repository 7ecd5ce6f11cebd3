use dictamesh_types::{
    AccessDescriptor, AuthKind, CatalogEntry, CatalogId, Classification, EntityRef, EntryStatus,
    HttpMethod, Sla, time::now_millis,
};
use rusqlite::{Connection, OptionalExtension, Row, named_params, params};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::Catalog;
use crate::error::CatalogError;

/// What an adapter (or the HTTP surface) submits to register an entity
/// instance.
#[derive(Clone, Debug)]
pub struct EntityRegistration {
    pub identity: EntityRef,
    pub access: AccessDescriptor,
    pub schema_version: Option<u32>,
    pub sla: Sla,
    pub classification: Classification,
}

#[derive(Clone, Debug)]
pub struct RegisterOutcome {
    pub entry: CatalogEntry,
    /// False when the identity tuple was already registered and this call
    /// was an upsert.
    pub created: bool,
}

#[derive(Clone, Debug, Default)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub domain: Option<String>,
    pub source_system: Option<String>,
    pub status: Option<EntryStatus>,
    pub pii: Option<bool>,
}

#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_next: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct EntityListing {
    pub data: Vec<CatalogEntry>,
    pub pagination: Pagination,
}

/// Facet counts over the filtered result set. Empty when facet
/// computation failed; the core results still come back.
#[derive(Serialize, Clone, Debug, Default)]
pub struct Facets {
    pub entity_type: BTreeMap<String, u64>,
    pub domain: BTreeMap<String, u64>,
    pub status: BTreeMap<String, u64>,
}

#[derive(Serialize, Clone, Debug)]
pub struct SearchResult {
    pub data: Vec<CatalogEntry>,
    pub facets: Facets,
    pub pagination: Pagination,
}

/// Partial update applied by `PUT /catalog/entities/{id}`.
#[derive(Clone, Debug, Default)]
pub struct EntityPatch {
    pub access: Option<AccessDescriptor>,
    pub schema_version: Option<u32>,
    pub sla: Option<Sla>,
    pub classification: Option<Classification>,
    pub status: Option<EntryStatus>,
}

impl Catalog {
    /// Upsert on the identity tuple. Registering the same entity twice is
    /// equivalent to registering it once, except `updated_at` and
    /// `last_seen_at` advance.
    pub fn register_entity(
        &self,
        registration: &EntityRegistration,
    ) -> Result<RegisterOutcome, CatalogError> {
        validate_registration(registration)?;
        self.db
            .with_tx(|conn| register_entity_in(conn, registration))
    }

    pub fn get_entity(&self, id: &CatalogId) -> Result<CatalogEntry, CatalogError> {
        self.db.with(|conn| get_entity_in(conn, id))
    }

    pub fn find_by_source(
        &self,
        source_system: &str,
        source_entity_id: &str,
        entity_type: &str,
    ) -> Result<CatalogEntry, CatalogError> {
        self.db.with(|conn| {
            conn.query_row(
                &format!("{ENTRY_SELECT} WHERE source_system = ?1 AND source_entity_id = ?2 AND entity_type = ?3"),
                params![source_system, source_entity_id, entity_type],
                entry_from_row,
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound {
                what: "catalog entry",
                key: format!("{source_system}/{entity_type}/{source_entity_id}"),
            })
        })
    }

    pub fn update_entity(
        &self,
        id: &CatalogId,
        patch: &EntityPatch,
    ) -> Result<CatalogEntry, CatalogError> {
        self.db.with_tx(|conn| {
            let current = get_entity_in(conn, id)?;
            if let Some(next) = patch.status {
                if !current.status.can_transition_to(next) {
                    return Err(CatalogError::Conflict(format!(
                        "status cannot move from {} back to {next}",
                        current.status
                    )));
                }
            }
            let access = patch.access.clone().unwrap_or(current.access);
            let sla = patch.sla.unwrap_or(current.sla);
            let classification = patch
                .classification
                .clone()
                .unwrap_or(current.classification);
            if classification.pii && classification.class.is_none() {
                return Err(CatalogError::InvalidInput(
                    "PII entries must carry a classification class".into(),
                ));
            }
            let status = patch.status.unwrap_or(current.status);
            let schema_version = patch.schema_version.or(current.schema_version);
            let now = now_millis();

            conn.execute(
                "UPDATE dictamesh_entities SET
                    access_url_template = :url,
                    access_method = :method,
                    access_auth = :auth,
                    schema_version = :schema_version,
                    sla_availability_pct = :availability,
                    sla_p99_latency_ms = :p99,
                    sla_freshness_seconds = :freshness,
                    pii = :pii,
                    classification = :class,
                    retention_days = :retention,
                    status = :status,
                    updated_at = :now
                 WHERE id = :id",
                named_params! {
                    ":url": access.url_template,
                    ":method": access.method.as_str(),
                    ":auth": access.auth.as_str(),
                    ":schema_version": schema_version,
                    ":availability": sla.availability_pct,
                    ":p99": sla.p99_latency_ms as i64,
                    ":freshness": sla.freshness_seconds as i64,
                    ":pii": classification.pii,
                    ":class": classification.class,
                    ":retention": classification.retention_days,
                    ":status": status.as_str(),
                    ":now": now,
                    ":id": id,
                },
            )?;
            get_entity_in(conn, id)
        })
    }

    /// Soft delete: status moves to archived, the row stays.
    pub fn archive_entity(&self, id: &CatalogId) -> Result<(), CatalogError> {
        self.db.with_tx(|conn| {
            let changed = conn.execute(
                "UPDATE dictamesh_entities SET status = 'archived', updated_at = ?1 WHERE id = ?2",
                params![now_millis(), id],
            )?;
            if changed == 0 {
                return Err(CatalogError::NotFound {
                    what: "catalog entry",
                    key: id.as_str().to_string(),
                });
            }
            Ok(())
        })
    }

    pub fn list_entities(
        &self,
        filter: &EntityFilter,
        page: Page,
    ) -> Result<EntityListing, CatalogError> {
        self.db.with(|conn| {
            let (where_sql, params) = filter_clause(filter, None);
            let total = count_filtered(conn, &where_sql, &params)?;
            let data = select_filtered(conn, &where_sql, &params, page)?;
            Ok(EntityListing {
                data,
                pagination: paginate(total, page),
            })
        })
    }

    /// Full-text-ish search over identity fields, with faceted counts.
    /// Facet failure logs a warning and degrades to core results.
    pub fn search(
        &self,
        query: &str,
        filter: &EntityFilter,
        page: Page,
    ) -> Result<SearchResult, CatalogError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(CatalogError::InvalidInput("empty search query".into()));
        }
        self.db.with(|conn| {
            let (where_sql, params) = filter_clause(filter, Some(&needle));
            let total = count_filtered(conn, &where_sql, &params)?;
            let data = select_filtered(conn, &where_sql, &params, page)?;
            let facets = match compute_facets(conn, &where_sql, &params) {
                Ok(facets) => facets,
                Err(err) => {
                    tracing::warn!(%err, "facet computation failed; returning core results");
                    Facets::default()
                }
            };
            Ok(SearchResult {
                data,
                facets,
                pagination: paginate(total, page),
            })
        })
    }
}

fn validate_registration(registration: &EntityRegistration) -> Result<(), CatalogError> {
    let identity = &registration.identity;
    if identity.entity_type.is_empty()
        || identity.source_system.is_empty()
        || identity.source_entity_id.is_empty()
    {
        return Err(CatalogError::InvalidInput(
            "entity_type, source_system and source_entity_id are required".into(),
        ));
    }
    if !registration.access.url_template.contains("{id}") {
        return Err(CatalogError::InvalidInput(
            "access url_template must carry an {id} placeholder".into(),
        ));
    }
    if registration.classification.pii && registration.classification.class.is_none() {
        return Err(CatalogError::InvalidInput(
            "PII entries must carry a classification class".into(),
        ));
    }
    Ok(())
}

pub(crate) fn register_entity_in(
    conn: &Connection,
    registration: &EntityRegistration,
) -> Result<RegisterOutcome, CatalogError> {
    let identity = &registration.identity;
    let existing: Option<CatalogId> = conn
        .query_row(
            "SELECT id FROM dictamesh_entities
             WHERE source_system = ?1 AND source_entity_id = ?2 AND entity_type = ?3",
            params![
                identity.source_system,
                identity.source_entity_id,
                identity.entity_type
            ],
            |row| row.get(0),
        )
        .optional()?;

    let now = now_millis();
    let search_text = search_text_for(identity);

    if let Some(id) = existing {
        conn.execute(
            "UPDATE dictamesh_entities SET
                domain = :domain,
                access_url_template = :url,
                access_method = :method,
                access_auth = :auth,
                schema_version = COALESCE(:schema_version, schema_version),
                sla_availability_pct = :availability,
                sla_p99_latency_ms = :p99,
                sla_freshness_seconds = :freshness,
                pii = :pii,
                classification = :class,
                retention_days = :retention,
                search_text = :search_text,
                updated_at = :now,
                last_seen_at = :now
             WHERE id = :id",
            named_params! {
                ":domain": identity.domain,
                ":url": registration.access.url_template,
                ":method": registration.access.method.as_str(),
                ":auth": registration.access.auth.as_str(),
                ":schema_version": registration.schema_version,
                ":availability": registration.sla.availability_pct,
                ":p99": registration.sla.p99_latency_ms as i64,
                ":freshness": registration.sla.freshness_seconds as i64,
                ":pii": registration.classification.pii,
                ":class": registration.classification.class,
                ":retention": registration.classification.retention_days,
                ":search_text": search_text,
                ":now": now,
                ":id": id,
            },
        )?;
        return Ok(RegisterOutcome {
            entry: get_entity_in(conn, &id)?,
            created: false,
        });
    }

    let id = CatalogId::generate();
    conn.execute(
        "INSERT INTO dictamesh_entities (
            id, entity_type, domain, source_system, source_entity_id,
            access_url_template, access_method, access_auth, schema_version,
            sla_availability_pct, sla_p99_latency_ms, sla_freshness_seconds,
            pii, classification, retention_days, status, search_text,
            created_at, updated_at, last_seen_at
         ) VALUES (
            :id, :entity_type, :domain, :source_system, :source_entity_id,
            :url, :method, :auth, :schema_version,
            :availability, :p99, :freshness,
            :pii, :class, :retention, 'active', :search_text,
            :now, :now, :now
         )",
        named_params! {
            ":id": id,
            ":entity_type": identity.entity_type,
            ":domain": identity.domain,
            ":source_system": identity.source_system,
            ":source_entity_id": identity.source_entity_id,
            ":url": registration.access.url_template,
            ":method": registration.access.method.as_str(),
            ":auth": registration.access.auth.as_str(),
            ":schema_version": registration.schema_version,
            ":availability": registration.sla.availability_pct,
            ":p99": registration.sla.p99_latency_ms as i64,
            ":freshness": registration.sla.freshness_seconds as i64,
            ":pii": registration.classification.pii,
            ":class": registration.classification.class,
            ":retention": registration.classification.retention_days,
            ":search_text": search_text,
            ":now": now,
        },
    )?;
    Ok(RegisterOutcome {
        entry: get_entity_in(conn, &id)?,
        created: true,
    })
}

pub(crate) fn get_entity_in(
    conn: &Connection,
    id: &CatalogId,
) -> Result<CatalogEntry, CatalogError> {
    conn.query_row(
        &format!("{ENTRY_SELECT} WHERE id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::NotFound {
        what: "catalog entry",
        key: id.as_str().to_string(),
    })
}

const ENTRY_SELECT: &str = "SELECT
    id, entity_type, domain, source_system, source_entity_id,
    access_url_template, access_method, access_auth, schema_version,
    sla_availability_pct, sla_p99_latency_ms, sla_freshness_seconds,
    pii, classification, retention_days, status,
    created_at, updated_at, last_seen_at
 FROM dictamesh_entities";

pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let method_raw: String = row.get(6)?;
    let auth_raw: String = row.get(7)?;
    let status_raw: String = row.get(15)?;

    let method = HttpMethod::parse(&method_raw)
        .ok_or_else(|| stored_value_error(6, format!("unknown http method {method_raw}")))?;
    let auth = AuthKind::parse(&auth_raw)
        .ok_or_else(|| stored_value_error(7, format!("unknown auth kind {auth_raw}")))?;
    let status = EntryStatus::parse(&status_raw)
        .ok_or_else(|| stored_value_error(15, format!("unknown status {status_raw}")))?;

    Ok(CatalogEntry {
        id: row.get(0)?,
        identity: EntityRef {
            entity_type: row.get(1)?,
            domain: row.get(2)?,
            source_system: row.get(3)?,
            source_entity_id: row.get(4)?,
        },
        access: AccessDescriptor {
            url_template: row.get(5)?,
            method,
            auth,
        },
        schema_version: row.get(8)?,
        sla: Sla {
            availability_pct: row.get(9)?,
            p99_latency_ms: row.get::<_, i64>(10)? as u64,
            freshness_seconds: row.get::<_, i64>(11)? as u64,
        },
        classification: Classification {
            pii: row.get(12)?,
            class: row.get(13)?,
            retention_days: row.get(14)?,
        },
        status,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        last_seen_at: row.get(18)?,
    })
}

fn stored_value_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn search_text_for(identity: &EntityRef) -> String {
    format!(
        "{} {} {} {}",
        identity.entity_type, identity.domain, identity.source_system, identity.source_entity_id
    )
    .to_lowercase()
}

fn filter_clause(
    filter: &EntityFilter,
    needle: Option<&str>,
) -> (String, Vec<(&'static str, String)>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(entity_type) = &filter.entity_type {
        clauses.push("entity_type = :entity_type");
        params.push((":entity_type", entity_type.clone()));
    }
    if let Some(domain) = &filter.domain {
        clauses.push("domain = :domain");
        params.push((":domain", domain.clone()));
    }
    if let Some(source_system) = &filter.source_system {
        clauses.push("source_system = :source_system");
        params.push((":source_system", source_system.clone()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = :status");
        params.push((":status", status.as_str().to_string()));
    }
    if let Some(pii) = filter.pii {
        clauses.push("pii = :pii");
        params.push((":pii", if pii { "1".into() } else { "0".into() }));
    }
    if let Some(needle) = needle {
        clauses.push("search_text LIKE :needle");
        params.push((":needle", format!("%{needle}%")));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, params)
}

fn bindable<'a>(
    params: &'a [(&'static str, String)],
) -> Vec<(&'static str, &'a dyn rusqlite::ToSql)> {
    params
        .iter()
        .map(|(name, value)| (*name, value as &dyn rusqlite::ToSql))
        .collect()
}

fn count_filtered(
    conn: &Connection,
    where_sql: &str,
    params: &[(&'static str, String)],
) -> Result<u64, CatalogError> {
    let sql = format!("SELECT COUNT(*) FROM dictamesh_entities{where_sql}");
    let count: i64 = conn.query_row(&sql, bindable(params).as_slice(), |row| row.get(0))?;
    Ok(count as u64)
}

fn select_filtered(
    conn: &Connection,
    where_sql: &str,
    params: &[(&'static str, String)],
    page: Page,
) -> Result<Vec<CatalogEntry>, CatalogError> {
    let sql = format!(
        "{ENTRY_SELECT}{where_sql} ORDER BY entity_type, source_system, source_entity_id \
         LIMIT {} OFFSET {}",
        page.limit, page.offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(bindable(params).as_slice(), entry_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn compute_facets(
    conn: &Connection,
    where_sql: &str,
    params: &[(&'static str, String)],
) -> Result<Facets, CatalogError> {
    let mut facets = Facets::default();
    for (column, bucket) in [
        ("entity_type", &mut facets.entity_type),
        ("domain", &mut facets.domain),
        ("status", &mut facets.status),
    ] {
        let sql = format!(
            "SELECT {column}, COUNT(*) FROM dictamesh_entities{where_sql} GROUP BY {column}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(bindable(params).as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (key, count) = row?;
            bucket.insert(key, count as u64);
        }
    }
    Ok(facets)
}

fn paginate(total: u64, page: Page) -> Pagination {
    Pagination {
        total,
        limit: page.limit,
        offset: page.offset,
        has_next: (page.offset as u64 + page.limit as u64) < total,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn registration(source_entity_id: &str, entity_type: &str) -> EntityRegistration {
        EntityRegistration {
            identity: EntityRef {
                entity_type: entity_type.into(),
                domain: "customers".into(),
                source_system: "directus".into(),
                source_entity_id: source_entity_id.into(),
            },
            access: AccessDescriptor {
                url_template: format!(
                    "https://api.directus.example/items/{entity_type}/{{id}}"
                ),
                method: HttpMethod::Get,
                auth: AuthKind::Bearer,
            },
            schema_version: Some(1),
            sla: Sla {
                availability_pct: 99.9,
                p99_latency_ms: 250,
                freshness_seconds: 300,
            },
            classification: Classification::default(),
        }
    }

    #[test]
    fn register_twice_is_an_upsert() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let first = catalog
            .register_entity(&registration("c-1", "customer"))
            .expect("first registration");
        assert!(first.created);
        assert_eq!(first.entry.status, EntryStatus::Active);

        let second = catalog
            .register_entity(&registration("c-1", "customer"))
            .expect("second registration");
        assert!(!second.created);
        assert_eq!(second.entry.id, first.entry.id);
        assert_eq!(second.entry.created_at, first.entry.created_at);
        assert!(second.entry.updated_at >= first.entry.updated_at);
    }

    #[test]
    fn identity_tuple_distinguishes_types() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let a = catalog
            .register_entity(&registration("x-1", "customer"))
            .expect("customer");
        let b = catalog
            .register_entity(&registration("x-1", "order"))
            .expect("order");
        assert_ne!(a.entry.id, b.entry.id);
    }

    #[test]
    fn get_entity_misses_with_not_found() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let err = catalog
            .get_entity(&CatalogId::new("ce-missing"))
            .expect_err("missing entry should be NotFound");
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[test]
    fn pii_requires_a_class() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let mut reg = registration("c-1", "customer");
        reg.classification.pii = true;
        let err = catalog
            .register_entity(&reg)
            .expect_err("PII without class should be rejected");
        assert!(matches!(err, CatalogError::InvalidInput(_)));

        reg.classification.class = Some("personal".into());
        catalog
            .register_entity(&reg)
            .expect("PII with class should register");
    }

    #[test]
    fn archive_is_soft_and_terminal() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let outcome = catalog
            .register_entity(&registration("c-1", "customer"))
            .expect("register");
        catalog.archive_entity(&outcome.entry.id).expect("archive");

        let entry = catalog.get_entity(&outcome.entry.id).expect("still readable");
        assert_eq!(entry.status, EntryStatus::Archived);

        let err = catalog
            .update_entity(
                &outcome.entry.id,
                &EntityPatch {
                    status: Some(EntryStatus::Active),
                    ..EntityPatch::default()
                },
            )
            .expect_err("unarchiving should conflict");
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn listing_paginates_with_has_next() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        for i in 0..5 {
            catalog
                .register_entity(&registration(&format!("c-{i}"), "customer"))
                .expect("register");
        }
        let listing = catalog
            .list_entities(
                &EntityFilter::default(),
                Page {
                    limit: 2,
                    offset: 0,
                },
            )
            .expect("list");
        assert_eq!(listing.data.len(), 2);
        assert_eq!(listing.pagination.total, 5);
        assert!(listing.pagination.has_next);

        let tail = catalog
            .list_entities(
                &EntityFilter::default(),
                Page {
                    limit: 2,
                    offset: 4,
                },
            )
            .expect("list tail");
        assert_eq!(tail.data.len(), 1);
        assert!(!tail.pagination.has_next);
    }

    #[test]
    fn search_matches_identity_fields_and_counts_facets() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        catalog
            .register_entity(&registration("c-1", "customer"))
            .expect("register");
        catalog
            .register_entity(&registration("o-1", "order"))
            .expect("register");

        let result = catalog
            .search("customer", &EntityFilter::default(), Page::default())
            .expect("search");
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.facets.entity_type.get("customer"), Some(&1));

        let by_source = catalog
            .search("directus", &EntityFilter::default(), Page::default())
            .expect("search by source");
        assert_eq!(by_source.data.len(), 2);
    }
}
