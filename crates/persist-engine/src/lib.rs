#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Periodic batched persistence pipeline: double-buffered worker caches, a
//! build/execute scheduler bounded by a build-pool width, and the batch-DAO
//! and metrics boundaries it drives.

/// Public API for the engine crate.
pub mod api;

mod cache;
mod dao;
mod error;
mod metrics;
mod registry;
mod timer;
mod worker;

pub use api::{
    BatchDao, InMemoryBatchDao, LimitedSizeBufferedData, MappedRequest, MetricMapper,
    MetricsPersistentWorker, MetricsSink, MetricsStreamProcessor, PersistError,
    PersistenceTimer, PersistenceWorker, PrometheusMetrics, ReadWriteSafeCache, TickReport,
    TopNCache, TopNMapper, TopNPersistentWorker, TopNStreamProcessor, WorkerRegistry,
    WorkerTickOutcome,
};
