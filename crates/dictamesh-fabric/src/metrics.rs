use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct TopicCounters {
    published: AtomicU64,
    consumed: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Per-topic publish/consume counters, cheap enough to bump on every
/// record.
pub struct FabricMetrics {
    topics: DashMap<String, TopicCounters>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TopicMetrics {
    pub published: u64,
    pub consumed: u64,
    pub dead_lettered: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub topics: BTreeMap<String, TopicMetrics>,
}

impl FabricMetrics {
    pub(crate) fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    pub(crate) fn on_published(&self, topic: &str) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .published
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_consumed(&self, topic: &str) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .consumed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_dead_lettered(&self, topic: &str) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut topics = BTreeMap::new();
        for entry in self.topics.iter() {
            topics.insert(
                entry.key().clone(),
                TopicMetrics {
                    published: entry.published.load(Ordering::Relaxed),
                    consumed: entry.consumed.load(Ordering::Relaxed),
                    dead_lettered: entry.dead_lettered.load(Ordering::Relaxed),
                },
            );
        }
        MetricsSnapshot { topics }
    }
}
