use async_trait::async_trait;
use dashmap::DashMap;
use dictamesh_types::CanonicalEntity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub l1_ttl: Duration,
    pub l2_ttl: Duration,
    pub l3_ttl: Duration,
    pub l1_max_entries_per_shard: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_ttl: Duration::from_secs(30),
            l2_ttl: Duration::from_secs(300),
            l3_ttl: Duration::from_secs(3_600),
            l1_max_entries_per_shard: 1_024,
        }
    }
}

impl CacheConfig {
    /// Per-layer TTLs must be finite and ordered `L1 ≤ L2 ≤ L3`.
    pub fn validate(&self) -> Result<(), String> {
        if self.l1_ttl.is_zero() || self.l2_ttl.is_zero() || self.l3_ttl.is_zero() {
            return Err("cache TTLs must be positive".into());
        }
        if self.l1_ttl > self.l2_ttl || self.l2_ttl > self.l3_ttl {
            return Err(format!(
                "cache TTLs must be ordered L1 <= L2 <= L3, got {:?} / {:?} / {:?}",
                self.l1_ttl, self.l2_ttl, self.l3_ttl
            ));
        }
        if self.l1_max_entries_per_shard == 0 {
            return Err("L1 shard capacity must be positive".into());
        }
        Ok(())
    }
}

struct L1Entry {
    value: CanonicalEntity,
    inserted_at: tokio::time::Instant,
    expires_at: tokio::time::Instant,
}

/// In-process cache: sharded map under fine-grained locks, TTL expiry on
/// read, oldest-out eviction when a shard hits its cap.
pub struct L1Cache {
    shards: Vec<Mutex<HashMap<String, L1Entry>>>,
    max_per_shard: usize,
}

const L1_SHARDS: usize = 16;

impl L1Cache {
    pub fn new(max_per_shard: usize) -> Self {
        Self {
            shards: (0..L1_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            max_per_shard,
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, L1Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() % L1_SHARDS as u64) as usize]
    }

    pub fn get(&self, key: &str) -> Option<CanonicalEntity> {
        let mut shard = self.shard_for(key).lock();
        let now = tokio::time::Instant::now();
        match shard.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                shard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: CanonicalEntity, ttl: Duration) {
        let mut shard = self.shard_for(&key).lock();
        let now = tokio::time::Instant::now();
        if shard.len() >= self.max_per_shard && !shard.contains_key(&key) {
            // Drop expired entries first; failing that, the oldest one.
            shard.retain(|_, entry| entry.expires_at > now);
            if shard.len() >= self.max_per_shard {
                if let Some(oldest) = shard
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone())
                {
                    shard.remove(&oldest);
                }
            }
        }
        shard.insert(
            key,
            L1Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.shard_for(key).lock().remove(key);
    }
}

/// The shared L2 store boundary. Production deployments plug an external
/// key-value backend in here; errors must be survivable, a failing cache
/// degrades reads to the source instead of failing them.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, String>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), String>;
    async fn remove(&self, key: &str) -> Result<(), String>;
}

/// Reference L2 backend for tests and single-process runs.
pub struct MemorySharedCache {
    entries: DashMap<String, (String, tokio::time::Instant)>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemorySharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let now = tokio::time::Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), String> {
        self.entries.insert(
            key.to_string(),
            (value, tokio::time::Instant::now() + ttl),
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), String> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str) -> CanonicalEntity {
        CanonicalEntity {
            entity_type: "customer".into(),
            entity_id: id.into(),
            version: 1,
            payload: serde_json::json!({"id": id}),
            etag: None,
            fetched_at: 0,
        }
    }

    #[test]
    fn ttl_ordering_is_enforced() {
        let mut config = CacheConfig::default();
        assert!(config.validate().is_ok());
        config.l1_ttl = Duration::from_secs(600);
        assert!(config.validate().is_err(), "L1 > L2 must be rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn l1_entries_expire() {
        let cache = L1Cache::new(8);
        cache.insert("k".into(), entity("c-1"), Duration::from_secs(30));
        assert!(cache.get("k").is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.get("k").is_none(), "expired value never returned");
    }

    #[tokio::test(start_paused = true)]
    async fn l1_caps_each_shard() {
        let cache = L1Cache::new(1);
        for i in 0..64 {
            cache.insert(format!("k-{i}"), entity("c-1"), Duration::from_secs(60));
        }
        let total: usize = cache.shards.iter().map(|shard| shard.lock().len()).sum();
        assert!(
            total <= L1_SHARDS,
            "each shard holds at most one entry, got {total}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shared_cache_round_trips_with_ttl() {
        let cache = MemorySharedCache::new();
        cache
            .set("k", "v".into(), Duration::from_secs(300))
            .await
            .expect("set");
        assert_eq!(cache.get("k").await.expect("get"), Some("v".to_string()));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(cache.get("k").await.expect("get"), None);
    }
}
