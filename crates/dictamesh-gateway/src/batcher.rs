use dictamesh_runtime::{AdapterRegistry, EntityQuery};
use dictamesh_types::{CanonicalEntity, MeshError, RequestContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug)]
pub struct BatcherConfig {
    /// How long a batch accumulates before flushing.
    pub window: Duration,
    /// Size cap that flushes a batch early; also bounds adapter load.
    pub max_batch: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(10),
            max_batch: 100,
        }
    }
}

type Waiter = (String, oneshot::Sender<Result<CanonicalEntity, MeshError>>);

struct Batch {
    waiters: Vec<Waiter>,
    scheduled: bool,
}

/// Per-request request coalescing: every by-id fetch for the same entity
/// type within the window collapses into one `query_entities(ids)` call
/// to the owning adapter. Scoped strictly to one query execution; nothing
/// here outlives the request.
pub struct Batcher {
    registry: Arc<AdapterRegistry>,
    config: BatcherConfig,
    pending: Mutex<HashMap<String, Batch>>,
    flushes: Mutex<HashMap<String, u64>>,
}

impl Batcher {
    pub fn new(registry: Arc<AdapterRegistry>, config: BatcherConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            pending: Mutex::new(HashMap::new()),
            flushes: Mutex::new(HashMap::new()),
        })
    }

    /// How many adapter calls this batcher issued for one entity type;
    /// the N+1 guard rails in tests key off this.
    pub fn adapter_calls(&self, entity_type: &str) -> u64 {
        self.flushes
            .lock()
            .get(entity_type)
            .copied()
            .unwrap_or(0)
    }

    pub async fn load(
        self: &Arc<Self>,
        ctx: &RequestContext,
        entity_type: &str,
        id: &str,
    ) -> Result<CanonicalEntity, MeshError> {
        let (tx, rx) = oneshot::channel();
        let flush_now = {
            let mut pending = self.pending.lock();
            let batch = pending
                .entry(entity_type.to_string())
                .or_insert_with(|| Batch {
                    waiters: Vec::new(),
                    scheduled: false,
                });
            batch.waiters.push((id.to_string(), tx));
            if batch.waiters.len() >= self.config.max_batch {
                true
            } else {
                if !batch.scheduled {
                    batch.scheduled = true;
                    let this = Arc::clone(self);
                    let entity_type = entity_type.to_string();
                    let flush_ctx = ctx.child();
                    tokio::spawn(async move {
                        tokio::time::sleep(this.config.window).await;
                        this.flush(&flush_ctx, &entity_type).await;
                    });
                }
                false
            }
        };
        if flush_now {
            self.flush(&ctx.child(), entity_type).await;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(MeshError::Internal {
                detail: "batch flush dropped its waiters".into(),
            }),
        }
    }

    async fn flush(&self, ctx: &RequestContext, entity_type: &str) {
        let waiters = {
            let mut pending = self.pending.lock();
            match pending.remove(entity_type) {
                Some(batch) => batch.waiters,
                None => return,
            }
        };
        if waiters.is_empty() {
            return;
        }

        // One id can have several waiters; the adapter sees it once.
        let mut ids: Vec<String> = Vec::new();
        for (id, _) in &waiters {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        tracing::debug!(
            entity_type,
            batch_size = ids.len(),
            waiters = waiters.len(),
            "batch flush"
        );

        let outcome = match self.registry.by_entity_type(entity_type) {
            Some(registered) => {
                *self
                    .flushes
                    .lock()
                    .entry(entity_type.to_string())
                    .or_default() += 1;
                registered
                    .adapter
                    .query_entities(ctx, &EntityQuery::by_ids(ids))
                    .await
            }
            None => Err(MeshError::BadRequest {
                detail: format!("no adapter serves entity type {entity_type}"),
            }),
        };

        match outcome {
            Ok(entities) => {
                let mut by_id: HashMap<&str, &CanonicalEntity> = HashMap::new();
                for entity in &entities {
                    by_id.insert(entity.entity_id.as_str(), entity);
                }
                for (id, tx) in waiters {
                    let result = by_id
                        .get(id.as_str())
                        .map(|entity| (*entity).clone())
                        .ok_or_else(|| MeshError::NotFound {
                            entity_type: entity_type.to_string(),
                            id: id.clone(),
                        });
                    let _ = tx.send(result);
                }
            }
            Err(err) => {
                for (_, tx) in waiters {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }
}
