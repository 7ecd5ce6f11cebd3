use dictamesh_types::{CacheLayer, CacheStatus, CatalogId};
use rusqlite::{Row, params};

use crate::Catalog;
use crate::error::CatalogError;

/// One write-through observation reported by a cache layer.
#[derive(Clone, Debug)]
pub struct CacheWrite {
    pub catalog_id: CatalogId,
    pub layer: CacheLayer,
    pub cache_key: String,
    pub cached_at: i64,
    pub expires_at: i64,
}

impl Catalog {
    /// Record (or refresh) the freshness row for one entry at one layer.
    pub fn record_cache_status(&self, write: &CacheWrite) -> Result<(), CatalogError> {
        if write.expires_at <= write.cached_at {
            return Err(CatalogError::InvalidInput(
                "cache TTL must be finite and positive".into(),
            ));
        }
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO dictamesh_cache_status
                    (catalog_id, layer, cache_key, cached_at, expires_at, hit_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)
                 ON CONFLICT (catalog_id, layer) DO UPDATE SET
                    cache_key = excluded.cache_key,
                    cached_at = excluded.cached_at,
                    expires_at = excluded.expires_at",
                params![
                    write.catalog_id,
                    write.layer.as_str(),
                    write.cache_key,
                    write.cached_at,
                    write.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn record_cache_hit(
        &self,
        catalog_id: &CatalogId,
        layer: CacheLayer,
    ) -> Result<(), CatalogError> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE dictamesh_cache_status SET hit_count = hit_count + 1
                 WHERE catalog_id = ?1 AND layer = ?2",
                params![catalog_id, layer.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn invalidate_cache_status(
        &self,
        catalog_id: &CatalogId,
        layer: Option<CacheLayer>,
    ) -> Result<(), CatalogError> {
        self.db.with(|conn| {
            match layer {
                Some(layer) => conn.execute(
                    "DELETE FROM dictamesh_cache_status WHERE catalog_id = ?1 AND layer = ?2",
                    params![catalog_id, layer.as_str()],
                )?,
                None => conn.execute(
                    "DELETE FROM dictamesh_cache_status WHERE catalog_id = ?1",
                    params![catalog_id],
                )?,
            };
            Ok(())
        })
    }

    pub fn cache_status_for(
        &self,
        catalog_id: &CatalogId,
    ) -> Result<Vec<CacheStatus>, CatalogError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT catalog_id, layer, cache_key, cached_at, expires_at, hit_count
                 FROM dictamesh_cache_status WHERE catalog_id = ?1 ORDER BY layer",
            )?;
            let rows = stmt.query_map(params![catalog_id], status_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<CacheStatus> {
    let layer_raw: String = row.get(1)?;
    let layer = CacheLayer::parse(&layer_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown cache layer {layer_raw}"),
            )),
        )
    })?;
    Ok(CacheStatus {
        catalog_id: row.get(0)?,
        layer,
        cache_key: row.get(2)?,
        cached_at: row.get(3)?,
        expires_at: row.get(4)?,
        hit_count: row.get::<_, i64>(5)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(layer: CacheLayer, cached_at: i64, expires_at: i64) -> CacheWrite {
        CacheWrite {
            catalog_id: CatalogId::new("ce-1"),
            layer,
            cache_key: "customers:1:customer:c-1".into(),
            cached_at,
            expires_at,
        }
    }

    #[test]
    fn write_through_then_hit_then_invalidate() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let id = CatalogId::new("ce-1");
        catalog
            .record_cache_status(&write(CacheLayer::L1, 1_000, 31_000))
            .expect("l1 write");
        catalog
            .record_cache_status(&write(CacheLayer::L2, 1_000, 301_000))
            .expect("l2 write");
        catalog.record_cache_hit(&id, CacheLayer::L1).expect("hit");

        let statuses = catalog.cache_status_for(&id).expect("statuses");
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].layer, CacheLayer::L1);
        assert_eq!(statuses[0].hit_count, 1);
        assert!(statuses[0].is_fresh(30_000));
        assert!(!statuses[0].is_fresh(31_000));

        catalog
            .invalidate_cache_status(&id, None)
            .expect("invalidate");
        assert!(catalog.cache_status_for(&id).expect("statuses").is_empty());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let catalog = Catalog::open_in_memory().expect("open catalog");
        let err = catalog
            .record_cache_status(&write(CacheLayer::L1, 1_000, 1_000))
            .expect_err("zero TTL should be rejected");
        assert!(matches!(err, CatalogError::InvalidInput(_)));
    }
}
