use serde::{Deserialize, Serialize};

use crate::ids::CatalogId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheLayer {
    L1,
    L2,
    L3,
}

impl CacheLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "L1" => Some(Self::L1),
            "L2" => Some(Self::L2),
            "L3" => Some(Self::L3),
            _ => None,
        }
    }
}

/// Freshness metadata for one cached entity at one layer. The L3 record
/// lives catalog-side and only describes freshness; it is not a bulk cache.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheStatus {
    pub catalog_id: CatalogId,
    pub layer: CacheLayer,
    pub cache_key: String,
    pub cached_at: i64,
    pub expires_at: i64,
    pub hit_count: u64,
}

impl CacheStatus {
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at
    }
}
