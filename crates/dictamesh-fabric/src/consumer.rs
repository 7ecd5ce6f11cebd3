use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::producer::Producer;
use crate::topic::{StoredRecord, TOPIC_DEAD_LETTER};
use crate::{
    HEADER_FAILURE_REASON, HEADER_ORIGIN_OFFSET, HEADER_ORIGIN_PARTITION, HEADER_ORIGIN_TOPIC,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Worth retrying in place with backoff.
    Retryable(String),
    /// Poison for this handler; goes straight to the dead-letter topic.
    Fatal(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable(reason) => write!(f, "retryable handler failure: {reason}"),
            Self::Fatal(reason) => write!(f, "fatal handler failure: {reason}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// One consumer-group member. The handler runs synchronously per record;
/// the offset only advances after it returns (or the record dead-letters).
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, record: &StoredRecord) -> Result<(), HandlerError>;
}

#[derive(Clone, Debug)]
pub struct SubscribeConfig {
    pub group_id: String,
    pub topics: Vec<String>,
    /// In-place attempts per record before dead-lettering.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl SubscribeConfig {
    pub fn new(group_id: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            group_id: group_id.into(),
            topics,
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            poll_interval: Duration::from_millis(25),
            batch_size: 50,
        }
    }
}

pub struct ConsumerHandle {
    broker: Arc<Broker>,
    group_id: String,
    topics: Vec<String>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Total uncommitted records across subscribed topics.
    pub fn lag(&self) -> u64 {
        self.topics
            .iter()
            .map(|t| self.broker.lag(&self.group_id, t).unwrap_or(0))
            .sum()
    }
}

/// Start a consumer group over `config.topics`. One task per topic keeps
/// per-partition order; offsets commit manually after each record lands.
pub fn subscribe(
    broker: Arc<Broker>,
    producer: Arc<Producer>,
    config: SubscribeConfig,
    handler: Arc<dyn EventHandler>,
) -> ConsumerHandle {
    let (shutdown, _) = watch::channel(false);
    let mut tasks = Vec::new();

    for topic in &config.topics {
        let task = tokio::spawn(poll_loop(
            Arc::clone(&broker),
            Arc::clone(&producer),
            config.clone(),
            topic.clone(),
            Arc::clone(&handler),
            shutdown.subscribe(),
        ));
        tasks.push(task);
    }

    ConsumerHandle {
        broker,
        group_id: config.group_id,
        topics: config.topics,
        shutdown,
        tasks,
    }
}

async fn poll_loop(
    broker: Arc<Broker>,
    producer: Arc<Producer>,
    config: SubscribeConfig,
    topic: String,
    handler: Arc<dyn EventHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let partitions = match broker.partition_count(&topic) {
        Ok(partitions) => partitions,
        Err(err) => {
            tracing::error!(%err, topic = %topic, group = %config.group_id, "cannot subscribe");
            return;
        }
    };

    loop {
        if *shutdown.borrow() {
            return;
        }

        let mut drained = true;
        for partition in 0..partitions {
            let committed = broker.committed(&config.group_id, &topic, partition);
            let batch =
                match broker.fetch(&topic, partition, committed, config.batch_size) {
                    Ok(batch) => batch,
                    Err(err) => {
                        tracing::warn!(%err, topic = %topic, partition, "fetch failed");
                        continue;
                    }
                };
            if !batch.is_empty() {
                drained = false;
            }
            for record in batch {
                if *shutdown.borrow() {
                    return;
                }
                process_record(&broker, &producer, &config, &record, handler.as_ref()).await;
                broker.metrics().on_consumed(&topic);
                broker.commit(&config.group_id, &topic, partition, record.offset + 1);
            }
        }

        if drained {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// Retry in place up to `max_attempts`, then republish to the dead-letter
/// topic with the original headers plus a failure reason. The caller
/// commits the original offset either way, so processing continues.
async fn process_record(
    broker: &Broker,
    producer: &Producer,
    config: &SubscribeConfig,
    record: &StoredRecord,
    handler: &dyn EventHandler,
) {
    let mut last_failure = String::new();
    for attempt in 1..=config.max_attempts {
        let outcome = AssertUnwindSafe(handler.handle(record)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => return,
            Ok(Err(HandlerError::Fatal(reason))) => {
                last_failure = reason;
                break;
            }
            Ok(Err(HandlerError::Retryable(reason))) => {
                last_failure = reason;
            }
            Err(_) => {
                last_failure = "handler panicked".to_string();
            }
        }
        if attempt < config.max_attempts {
            let backoff = config.base_backoff * 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(backoff).await;
        }
    }

    tracing::warn!(
        topic = %record.topic,
        partition = record.partition,
        offset = record.offset,
        event_id = %record.envelope.event_id,
        failure = %last_failure,
        "record exhausted retries"
    );

    if record.topic == TOPIC_DEAD_LETTER {
        // Terminal topic; nowhere further to route.
        return;
    }

    let mut headers = record.headers.clone();
    headers.insert(HEADER_FAILURE_REASON.into(), last_failure);
    headers.insert(HEADER_ORIGIN_TOPIC.into(), record.topic.clone());
    headers.insert(
        HEADER_ORIGIN_PARTITION.into(),
        record.partition.to_string(),
    );
    headers.insert(HEADER_ORIGIN_OFFSET.into(), record.offset.to_string());

    match producer
        .publish_with_headers(TOPIC_DEAD_LETTER, headers, record.envelope.clone())
        .await
    {
        Ok(_) => broker.metrics().on_dead_lettered(record.topic.as_str()),
        Err(err) => {
            tracing::error!(
                %err,
                event_id = %record.envelope.event_id,
                "dead-letter publish failed; record dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::ProducerConfig;
    use crate::topic::{TOPIC_ENTITY_CHANGED, TopicConfig};
    use dictamesh_types::{
        EntityPointer, EventEnvelope, EventId, EventType, TraceContext,
    };
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn envelope(event_id: &str, entity_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(event_id),
            event_type: EventType::EntityCreated,
            timestamp: 0,
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

    struct Recording {
        seen: Mutex<Vec<String>>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle(&self, record: &StoredRecord) -> Result<(), HandlerError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(HandlerError::Retryable("induced".into()));
            }
            self.seen
                .lock()
                .push(record.envelope.event_id.as_str().to_string());
            Ok(())
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn handler_success_advances_offsets() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());

        producer
            .publish(TOPIC_ENTITY_CHANGED, envelope("e-1", "c-1"))
            .await
            .expect("publish");

        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
        });
        let handle = subscribe(
            Arc::clone(&broker),
            Arc::clone(&producer),
            SubscribeConfig::new("catalog", vec![TOPIC_ENTITY_CHANGED.into()]),
            handler.clone(),
        );

        wait_until(|| handler.seen.lock().len() == 1).await;
        wait_until(|| handle.lag() == 0).await;
        handle.stop().await;
        assert_eq!(handler.seen.lock().as_slice(), ["e-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_success_keeps_record_out_of_dead_letter() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());

        producer
            .publish(TOPIC_ENTITY_CHANGED, envelope("e-1", "c-1"))
            .await
            .expect("publish");

        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(2),
        });
        let handle = subscribe(
            Arc::clone(&broker),
            Arc::clone(&producer),
            SubscribeConfig::new("catalog", vec![TOPIC_ENTITY_CHANGED.into()]),
            handler.clone(),
        );

        wait_until(|| handler.seen.lock().len() == 1).await;
        handle.stop().await;

        assert_eq!(broker.lag("dlq-probe", TOPIC_DEAD_LETTER).expect("lag"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter_and_commit() {
        let broker = Broker::new();
        broker.ensure_standard_topics().expect("standard topics");
        let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());

        producer
            .publish(TOPIC_ENTITY_CHANGED, envelope("e-poison", "c-9"))
            .await
            .expect("publish");

        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let handle = subscribe(
            Arc::clone(&broker),
            Arc::clone(&producer),
            SubscribeConfig::new("catalog", vec![TOPIC_ENTITY_CHANGED.into()]),
            handler.clone(),
        );

        wait_until(|| broker.lag("dlq-probe", TOPIC_DEAD_LETTER).unwrap_or(0) == 1).await;
        wait_until(|| handle.lag() == 0).await;
        handle.stop().await;

        let partitions = broker
            .partition_count(TOPIC_DEAD_LETTER)
            .expect("partitions");
        let mut dead = Vec::new();
        for partition in 0..partitions {
            dead.extend(
                broker
                    .fetch(TOPIC_DEAD_LETTER, partition, 0, 16)
                    .expect("fetch dead-letter"),
            );
        }
        assert_eq!(dead.len(), 1);
        let record = &dead[0];
        assert_eq!(record.envelope.event_id.as_str(), "e-poison");
        assert_eq!(
            record.headers.get(HEADER_ORIGIN_TOPIC).map(String::as_str),
            Some(TOPIC_ENTITY_CHANGED)
        );
        assert!(record.headers.contains_key(HEADER_FAILURE_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_groups_progress_independently() {
        let broker = Broker::new();
        broker
            .create_topic(TopicConfig::new("entity.changed", 1))
            .expect("topic");
        let producer = Producer::new(Arc::clone(&broker), ProducerConfig::default());
        producer
            .publish("entity.changed", envelope("e-1", "c-1"))
            .await
            .expect("publish");

        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
        });
        let handle = subscribe(
            Arc::clone(&broker),
            Arc::clone(&producer),
            SubscribeConfig::new("group-a", vec!["entity.changed".into()]),
            handler.clone(),
        );
        wait_until(|| handle.lag() == 0).await;
        handle.stop().await;

        assert_eq!(broker.lag("group-a", "entity.changed").expect("lag"), 0);
        assert_eq!(
            broker.lag("group-b", "entity.changed").expect("lag"),
            1,
            "an unrelated group keeps its own offsets"
        );
    }
}
