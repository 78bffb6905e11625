//! Public surface of the persistence engine: everything a host process needs
//! to register workers, wire up a DAO and metrics sink, and drive the
//! scheduler, re-exported from the engine's private modules.

pub use crate::cache::{LimitedSizeBufferedData, ReadWriteSafeCache, TopNCache};
pub use crate::dao::{BatchDao, InMemoryBatchDao};
pub use crate::error::{PersistError, TickReport, WorkerTickOutcome};
pub use crate::metrics::{
    MetricsSink, PrometheusMetrics, BULK_ALL_LATENCY, BULK_ERROR_COUNT, BULK_EXECUTE_LATENCY,
    BULK_PREPARE_LATENCY,
};
pub use crate::registry::{MetricsStreamProcessor, TopNStreamProcessor, WorkerRegistry};
pub use crate::timer::PersistenceTimer;
pub use crate::worker::{
    MappedRequest, MetricMapper, MetricsPersistentWorker, PersistenceWorker, TopNMapper,
    TopNPersistentWorker,
};
