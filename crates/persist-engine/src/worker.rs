//! Persistence workers (spec §4.1, §4.2): the per-kind offer/build/end-of-round
//! contract the scheduler drives, and the two concrete kinds the spec names.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use persist_core::{Model, PreparedRequest, StorageItem};

use crate::cache::{ReadWriteSafeCache, TopNCache};

/// The scheduler-facing surface every persistence worker implements,
/// regardless of what it buffers or how it maps items to requests.
///
/// `offer` is deliberately not part of this trait: producers hold the
/// concrete worker type (its item type differs per worker), while the
/// scheduler only ever needs this trait-object surface.
pub trait PersistenceWorker: Send + Sync {
    /// Drains whatever has accumulated since the last call and maps it into
    /// driver-ready requests. Must not block on I/O (spec §4.1): this runs
    /// inline on the build pool, not in a background thread.
    fn build_batch_requests(&self) -> Vec<PreparedRequest>;

    /// Runs after `build_batch_requests` for the same tick, whether or not it
    /// produced anything, and whether or not the flush that follows succeeds.
    fn end_of_round(&self);

    /// Identifies this worker in logs and metrics.
    fn name(&self) -> &str;
}

/// What a metrics worker's mapper produces for one drained item: the request
/// to flush, plus an optional session key to record a touch against.
pub struct MappedRequest {
    pub request: PreparedRequest,
    pub session_key: Option<String>,
}

pub type MetricMapper<T> = dyn Fn(&T) -> anyhow::Result<MappedRequest> + Send + Sync;

/// A worker backed by an unbounded [`ReadWriteSafeCache`], for metric-style
/// items with no natural ranking (spec §4.1).
///
/// When `enable_database_session` is set, `end_of_round` purges session-cache
/// entries older than `storage_session_timeout` (spec §4.1.1), resolving the
/// otherwise-unspecified `endOfRound` behavior for this worker kind.
pub struct MetricsPersistentWorker<T: StorageItem> {
    name: String,
    #[allow(dead_code)]
    model: Model,
    cache: ReadWriteSafeCache<T>,
    mapper: Arc<MetricMapper<T>>,
    session: Mutex<HashMap<String, Instant>>,
    enable_session: bool,
    session_timeout: Duration,
}

impl<T: StorageItem> MetricsPersistentWorker<T> {
    pub fn new(
        name: impl Into<String>,
        model: Model,
        enable_session: bool,
        session_timeout: Duration,
        mapper: Arc<MetricMapper<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            cache: ReadWriteSafeCache::new(),
            mapper,
            session: Mutex::new(HashMap::new()),
            enable_session,
            session_timeout,
        }
    }

    /// Buffers an item for the next tick. Never blocks.
    pub fn offer(&self, item: T) {
        self.cache.offer(item);
    }
}

impl<T: StorageItem> PersistenceWorker for MetricsPersistentWorker<T> {
    fn build_batch_requests(&self) -> Vec<PreparedRequest> {
        let drained = self.cache.read();
        let mut requests = Vec::with_capacity(drained.len());
        let mut touched = Vec::new();

        for item in &drained {
            match (self.mapper)(item) {
                Ok(mapped) => {
                    if let Some(key) = mapped.session_key {
                        touched.push(key);
                    }
                    requests.push(mapped.request);
                }
                Err(err) => {
                    let err = crate::error::PersistError::BuildItemFailed {
                        detail: err.to_string(),
                    };
                    tracing::error!(
                        worker = %self.name,
                        item_type = std::any::type_name::<T>(),
                        error = %err,
                        "dropping item: failed to build a prepared request"
                    );
                }
            }
        }

        if self.enable_session && !touched.is_empty() {
            let now = Instant::now();
            let mut session = self.session.lock().unwrap();
            for key in touched {
                session.insert(key, now);
            }
        }

        requests
    }

    fn end_of_round(&self) {
        if !self.enable_session {
            return;
        }
        let now = Instant::now();
        let timeout = self.session_timeout;
        self.session
            .lock()
            .unwrap()
            .retain(|_, last_seen| now.duration_since(*last_seen) < timeout);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub type TopNMapper<T> = dyn Fn(&T) -> anyhow::Result<PreparedRequest> + Send + Sync;

/// A worker backed by a bounded, size-N Top-N cache (spec §4.2, §4.5).
///
/// Items are ingested through a fixed-capacity single-producer/single-consumer
/// queue served by one dedicated consumer thread, keeping `offer` itself cheap
/// for producers; the consumer thread is the only writer into the cache. If
/// the consumer thread ever dies (it doesn't, barring a mapper-unrelated
/// panic) `offer` starts failing loudly instead of silently dropping data.
pub struct TopNPersistentWorker<T: Ord + StorageItem> {
    name: String,
    #[allow(dead_code)]
    model: Model,
    cache: Arc<TopNCache<T>>,
    tx: SyncSender<T>,
    consumer: Mutex<Option<thread::JoinHandle<()>>>,
    mapper: Arc<TopNMapper<T>>,
    report_period: Duration,
    last_report: Mutex<Option<Instant>>,
}

impl<T: Ord + StorageItem> TopNPersistentWorker<T> {
    /// Default inbound queue capacity (spec §4.2).
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

    pub fn new(
        name: impl Into<String>,
        model: Model,
        top_n: usize,
        report_period: Duration,
        mapper: Arc<TopNMapper<T>>,
    ) -> Self {
        Self::with_queue_capacity(
            name,
            model,
            top_n,
            Self::DEFAULT_QUEUE_CAPACITY,
            report_period,
            mapper,
        )
    }

    pub fn with_queue_capacity(
        name: impl Into<String>,
        model: Model,
        top_n: usize,
        queue_capacity: usize,
        report_period: Duration,
        mapper: Arc<TopNMapper<T>>,
    ) -> Self {
        let name = name.into();
        let cache = Arc::new(TopNCache::new(top_n));
        let (tx, rx) = sync_channel::<T>(queue_capacity.max(1));

        let consumer_cache = cache.clone();
        let consumer_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("topn-consumer-{consumer_name}"))
            .spawn(move || {
                while let Ok(item) = rx.recv() {
                    consumer_cache.offer(item);
                }
                tracing::debug!(worker = %consumer_name, "top-n consumer thread exiting: sender dropped");
            })
            .expect("failed to spawn top-n consumer thread");

        Self {
            name,
            model,
            cache,
            tx,
            consumer: Mutex::new(Some(handle)),
            mapper,
            report_period,
            last_report: Mutex::new(Some(Instant::now())),
        }
    }

    /// Enqueues an item for the consumer thread to fold into the Top-N set.
    /// Blocks only as long as it takes the consumer to make room; if the
    /// consumer thread has died, logs and drops the item rather than hanging.
    pub fn offer(&self, item: T) {
        if self.tx.send(item).is_err() {
            tracing::error!(worker = %self.name, "top-n consumer thread is gone; item dropped");
        }
    }
}

impl<T: Ord + StorageItem> PersistenceWorker for TopNPersistentWorker<T> {
    fn build_batch_requests(&self) -> Vec<PreparedRequest> {
        let now = Instant::now();
        {
            let mut last_report = self.last_report.lock().unwrap();
            if let Some(last) = *last_report {
                if now.duration_since(last) < self.report_period {
                    return Vec::new();
                }
            }
            *last_report = Some(now);
        }

        self.cache
            .read()
            .into_iter()
            .filter_map(|item| match (self.mapper)(&item) {
                Ok(request) => Some(request),
                Err(err) => {
                    let err = crate::error::PersistError::BuildItemFailed {
                        detail: err.to_string(),
                    };
                    tracing::error!(
                        worker = %self.name,
                        item_type = std::any::type_name::<T>(),
                        error = %err,
                        "dropping item: failed to build a prepared request"
                    );
                    None
                }
            })
            .collect()
    }

    fn end_of_round(&self) {
        // Top-N carries no auxiliary per-round state (spec §4.2).
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Ord + StorageItem> Drop for TopNPersistentWorker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persist_core::PreparedRequest;

    fn noop_model() -> Model {
        Model::new("test.model")
    }

    #[test]
    fn metrics_worker_maps_and_drains_offered_items() {
        let mapper: Arc<MetricMapper<u32>> = Arc::new(|item: &u32| {
            Ok(MappedRequest {
                request: PreparedRequest::new("metric.upsert", *item),
                session_key: Some(format!("key-{item}")),
            })
        });
        let worker = MetricsPersistentWorker::new(
            "metrics",
            noop_model(),
            true,
            Duration::from_millis(1),
            mapper,
        );
        worker.offer(1);
        worker.offer(2);
        let requests = worker.build_batch_requests();
        assert_eq!(requests.len(), 2);
        worker.end_of_round();
        assert!(worker.build_batch_requests().is_empty());
    }

    #[test]
    fn metrics_worker_expires_session_entries_past_timeout() {
        let mapper: Arc<MetricMapper<u32>> = Arc::new(|item: &u32| {
            Ok(MappedRequest {
                request: PreparedRequest::new("metric.upsert", *item),
                session_key: Some("shared-key".to_string()),
            })
        });
        let worker = MetricsPersistentWorker::new(
            "metrics",
            noop_model(),
            true,
            Duration::from_millis(1),
            mapper,
        );
        worker.offer(1);
        let _ = worker.build_batch_requests();
        std::thread::sleep(Duration::from_millis(5));
        worker.end_of_round();
        assert!(worker.session.lock().unwrap().is_empty());
    }

    #[test]
    fn metrics_worker_skips_items_the_mapper_rejects() {
        let mapper: Arc<MetricMapper<u32>> =
            Arc::new(|item: &u32| anyhow::bail!("bad item {item}"));
        let worker =
            MetricsPersistentWorker::new("metrics", noop_model(), false, Duration::ZERO, mapper);
        worker.offer(1);
        assert!(worker.build_batch_requests().is_empty());
    }

    #[test]
    fn topn_worker_gates_on_report_period_from_construction() {
        let mapper: Arc<TopNMapper<u32>> =
            Arc::new(|item: &u32| Ok(PreparedRequest::new("topn.upsert", *item)));
        let worker = TopNPersistentWorker::new(
            "topn",
            noop_model(),
            2,
            Duration::from_millis(20),
            mapper,
        );
        worker.offer(5);
        worker.offer(9);
        std::thread::sleep(Duration::from_millis(5));
        // t_prev is the worker's start time (spec §4.2/invariant 4, S3): the
        // very first tick must stay empty until the period elapses from
        // construction, not flush unconditionally.
        assert!(worker.build_batch_requests().is_empty());

        std::thread::sleep(Duration::from_millis(20));
        assert!(!worker.build_batch_requests().is_empty());

        worker.offer(1);
        assert!(worker.build_batch_requests().is_empty());
    }
}
