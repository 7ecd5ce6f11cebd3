//! The adapter runtime: the standardized execution envelope every
//! source-system adapter runs through.
//!
//! Every read flows the same fixed stack: trace, rate limit, L1/L2 cache,
//! circuit breaker, retry with backoff, per-attempt timeout, the source
//! call itself, canonical transform, cache write-through, metrics. The
//! stack recovers retryable failures locally and surfaces only the final
//! outcome; `NotFound` is a regular result, not a failure.
//!
//! Internal state (breaker counters, rate-limit buckets, the L1 map) is
//! shared across callers and concurrency-safe: atomics with CAS
//! transitions, sharded maps behind fine-grained locks.

mod adapter;
mod breaker;
mod cache;
mod health;
mod memory;
mod metrics;
mod pipeline;
mod publisher;
mod ratelimit;
mod registry;
mod retry;

pub use adapter::{Capability, ChangeStream, ChangeStreamHandle, EntityQuery, SourceAdapter};
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use cache::{CacheConfig, L1Cache, MemorySharedCache, SharedCache};
pub use health::{CheckResult, HealthReport, HealthState, Probes};
pub use memory::MemoryAdapter;
pub use metrics::{AdapterMetrics, AdapterMetricsSnapshot, LatencyHistogram};
pub use pipeline::{ResilientAdapter, ResilientAdapterConfig};
pub use publisher::{ChangePublisher, ChangePublisherConfig, spawn_change_publisher};
pub use ratelimit::{RateLimitConfig, TokenBucket};
pub use registry::{AdapterRegistry, RegisteredAdapter};
pub use retry::RetryPolicy;
