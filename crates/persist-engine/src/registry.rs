//! Worker registries (spec §4.6, C5): append-only, read-mostly collections of
//! registered workers that the scheduler snapshots once per tick.

use std::sync::{Arc, RwLock};

use crate::worker::PersistenceWorker;

/// A registration-time-only collection of workers of one stream kind.
/// Registration happens at boot; the scheduler only ever reads a snapshot.
pub struct WorkerRegistry {
    workers: RwLock<Vec<Arc<dyn PersistenceWorker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, worker: Arc<dyn PersistenceWorker>) {
        self.workers.write().unwrap().push(worker);
    }

    /// A snapshot of every worker registered so far, taken once per tick.
    pub fn workers(&self) -> Vec<Arc<dyn PersistenceWorker>> {
        self.workers.read().unwrap().clone()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of metrics-stream workers (spec §4.1).
#[derive(Default)]
pub struct MetricsStreamProcessor {
    registry: WorkerRegistry,
}

impl MetricsStreamProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: Arc<dyn PersistenceWorker>) {
        self.registry.register(worker);
    }

    pub fn workers(&self) -> Vec<Arc<dyn PersistenceWorker>> {
        self.registry.workers()
    }
}

/// Registry of Top-N-stream workers (spec §4.2).
#[derive(Default)]
pub struct TopNStreamProcessor {
    registry: WorkerRegistry,
}

impl TopNStreamProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: Arc<dyn PersistenceWorker>) {
        self.registry.register(worker);
    }

    pub fn workers(&self) -> Vec<Arc<dyn PersistenceWorker>> {
        self.registry.workers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persist_core::PreparedRequest;

    struct StubWorker(&'static str);

    impl PersistenceWorker for StubWorker {
        fn build_batch_requests(&self) -> Vec<PreparedRequest> {
            Vec::new()
        }

        fn end_of_round(&self) {}

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn registries_snapshot_registered_workers_in_order() {
        let registry = MetricsStreamProcessor::new();
        registry.register(Arc::new(StubWorker("a")));
        registry.register(Arc::new(StubWorker("b")));
        let names: Vec<&str> = registry.workers().iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
