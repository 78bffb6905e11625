//! `PersistenceTimer` (spec §4.4): the fixed-delay scheduler that drives every
//! registered worker through build/execute each tick, bounded by a build-pool
//! width, and reports what happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use persist_core::RuntimeConfig;

use crate::dao::BatchDao;
use crate::error::{PersistError, TickReport, WorkerTickOutcome};
use crate::metrics::MetricsSink;
use crate::registry::{MetricsStreamProcessor, TopNStreamProcessor};
use crate::worker::PersistenceWorker;

struct Inner {
    metrics_registry: Arc<MetricsStreamProcessor>,
    topn_registry: Arc<TopNStreamProcessor>,
    dao: Mutex<Option<Arc<dyn BatchDao>>>,
    metrics: Mutex<Option<Arc<dyn MetricsSink>>>,
    config: Mutex<RuntimeConfig>,
    started: AtomicBool,
    stopping: AtomicBool,
    shutdown: Notify,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    last_tick: watch::Sender<Option<TickReport>>,
}

/// The scheduler. Construct once at boot, `start` it against a DAO and a
/// metrics sink, and `shutdown` it before the process exits.
///
/// `start` is idempotent (spec §4.4, "Startup"): calling it again after the
/// first time only rebinds the DAO/metrics/config references, it does not
/// spawn a second tick loop.
pub struct PersistenceTimer {
    inner: Arc<Inner>,
}

impl PersistenceTimer {
    pub fn new(
        metrics_registry: Arc<MetricsStreamProcessor>,
        topn_registry: Arc<TopNStreamProcessor>,
    ) -> Self {
        let (last_tick, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                metrics_registry,
                topn_registry,
                dao: Mutex::new(None),
                metrics: Mutex::new(None),
                config: Mutex::new(RuntimeConfig::default()),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                shutdown: Notify::new(),
                task: Mutex::new(None),
                last_tick,
            }),
        }
    }

    /// Observes the outcome of the most recently completed tick, if any.
    pub fn last_tick(&self) -> watch::Receiver<Option<TickReport>> {
        self.inner.last_tick.subscribe()
    }

    pub fn start(
        &self,
        dao: Arc<dyn BatchDao>,
        metrics: Arc<dyn MetricsSink>,
        config: RuntimeConfig,
    ) {
        *self.inner.dao.lock().unwrap() = Some(dao);
        *self.inner.metrics.lock().unwrap() = Some(metrics);
        *self.inner.config.lock().unwrap() = config.normalized();

        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(run_loop(inner));
        *self.inner.task.lock().unwrap() = Some(handle);
    }

    /// Stops scheduling new ticks and waits for any in-flight tick to finish
    /// (spec §4.4.1: a tick in progress is never cancelled mid-flight).
    pub async fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        let handle = self.inner.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_loop(inner: Arc<Inner>) {
    tokio::select! {
        _ = tokio::time::sleep(RuntimeConfig::INITIAL_DELAY) => {}
        _ = inner.shutdown.notified() => return,
    }

    loop {
        if inner.stopping.load(Ordering::SeqCst) {
            return;
        }

        let config = *inner.config.lock().unwrap();
        let dao = inner.dao.lock().unwrap().clone();
        let metrics = inner.metrics.lock().unwrap().clone();

        if let (Some(dao), Some(metrics)) = (dao, metrics) {
            let report = run_tick(
                &inner.metrics_registry,
                &inner.topn_registry,
                dao,
                metrics,
                config.prepare_threads,
            )
            .await;
            let _ = inner.last_tick.send(Some(report));
        }

        tokio::select! {
            _ = tokio::time::sleep(config.persistent_period) => {}
            _ = inner.shutdown.notified() => return,
        }
    }
}

/// Runs one full tick: snapshots both registries, builds and flushes each
/// worker's batch concurrently (bounded to `prepare_threads` at a time), and
/// summarizes the result (spec §4.4 steps 1-6).
async fn run_tick(
    metrics_registry: &MetricsStreamProcessor,
    topn_registry: &TopNStreamProcessor,
    dao: Arc<dyn BatchDao>,
    metrics: Arc<dyn MetricsSink>,
    prepare_threads: usize,
) -> TickReport {
    let all_timer = metrics.start_all_timer();

    let mut workers = metrics_registry.workers();
    workers.extend(topn_registry.workers());
    let workers_considered = workers.len();

    let semaphore = Arc::new(Semaphore::new(prepare_threads.max(1)));
    let mut join_set = JoinSet::new();
    for worker in workers {
        let semaphore = semaphore.clone();
        let dao = dao.clone();
        let metrics = metrics.clone();
        join_set.spawn(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .expect("build-pool semaphore never closes");
            run_worker_tick(worker, dao, metrics, permit).await
        });
    }

    let mut workers_flushed = 0usize;
    let mut requests_flushed = 0usize;
    let mut failed = false;

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(outcome)) => {
                if outcome.flushed {
                    workers_flushed += 1;
                    requests_flushed += outcome.request_count;
                }
            }
            Ok(Err(err)) => {
                failed = true;
                tracing::error!(error = %err, "persistence worker tick failed");
            }
            Err(join_err) => {
                failed = true;
                let err = PersistError::WorkerPanicked(join_err.to_string());
                tracing::error!(error = %err, "persistence build task panicked");
            }
        }
    }

    drop(all_timer);

    if failed {
        metrics.inc_bulk_error();
    }

    TickReport {
        workers_considered,
        workers_flushed,
        requests_flushed,
        failed,
    }
}

async fn run_worker_tick(
    worker: Arc<dyn PersistenceWorker>,
    dao: Arc<dyn BatchDao>,
    metrics: Arc<dyn MetricsSink>,
    build_permit: OwnedSemaphorePermit,
) -> Result<WorkerTickOutcome, PersistError> {
    let prepare_timer = metrics.start_prepare_timer();
    let requests = worker.build_batch_requests();
    worker.end_of_round();
    drop(prepare_timer);

    // The build-pool width bounds only the CPU-bound prepare stage (spec §4.4
    // rationale, §5): release the slot here so the I/O-bound flush below runs
    // under the DAO's own concurrency, not the build pool's.
    drop(build_permit);

    if requests.is_empty() {
        return Ok(WorkerTickOutcome {
            flushed: false,
            request_count: 0,
        });
    }

    let execute_timer = metrics.start_execute_timer();
    let request_count = requests.len();
    let result = dao.flush(requests).await;
    drop(execute_timer);

    result
        .map(|()| WorkerTickOutcome {
            flushed: true,
            request_count,
        })
        .map_err(PersistError::Flush)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::InMemoryBatchDao;
    use crate::metrics::PrometheusMetrics;
    use crate::worker::{MappedRequest, MetricsPersistentWorker};
    use persist_core::{Model, PreparedRequest};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tick_flushes_every_registered_worker() {
        let metrics_registry = Arc::new(MetricsStreamProcessor::new());
        let topn_registry = Arc::new(TopNStreamProcessor::new());

        let mapper: Arc<_> = Arc::new(|item: &u32| {
            Ok(MappedRequest {
                request: PreparedRequest::new("metric.upsert", *item),
                session_key: None,
            })
        });
        let worker = Arc::new(MetricsPersistentWorker::new(
            "metrics",
            Model::new("test"),
            false,
            Duration::from_secs(1),
            mapper,
        ));
        worker.offer(1);
        worker.offer(2);
        metrics_registry.register(worker);

        let dao: Arc<dyn BatchDao> = Arc::new(InMemoryBatchDao::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusMetrics::new().unwrap());

        let report = run_tick(&metrics_registry, &topn_registry, dao, metrics, 2).await;
        assert_eq!(report.workers_considered, 1);
        assert_eq!(report.workers_flushed, 1);
        assert_eq!(report.requests_flushed, 2);
        assert!(!report.failed);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_reports_failure_without_losing_other_workers() {
        let metrics_registry = Arc::new(MetricsStreamProcessor::new());
        let topn_registry = Arc::new(TopNStreamProcessor::new());

        let mapper: Arc<_> = Arc::new(|item: &u32| {
            Ok(MappedRequest {
                request: PreparedRequest::new("metric.upsert", *item),
                session_key: None,
            })
        });
        let ok_worker = Arc::new(MetricsPersistentWorker::new(
            "ok",
            Model::new("test"),
            false,
            Duration::from_secs(1),
            mapper.clone(),
        ));
        ok_worker.offer(1);
        metrics_registry.register(ok_worker);

        let failing_worker = Arc::new(MetricsPersistentWorker::new(
            "failing",
            Model::new("test"),
            false,
            Duration::from_secs(1),
            mapper,
        ));
        failing_worker.offer(2);
        metrics_registry.register(failing_worker);

        struct SplitDao;
        impl BatchDao for SplitDao {
            fn flush<'a>(
                &'a self,
                requests: Vec<PreparedRequest>,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>,
            > {
                Box::pin(async move {
                    if requests
                        .iter()
                        .any(|r| r.downcast_ref::<u32>() == Some(&2))
                    {
                        anyhow::bail!("simulated failure for item 2");
                    }
                    Ok(())
                })
            }
        }

        let dao: Arc<dyn BatchDao> = Arc::new(SplitDao);
        let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusMetrics::new().unwrap());

        let report = run_tick(&metrics_registry, &topn_registry, dao, metrics, 2).await;
        assert_eq!(report.workers_considered, 2);
        assert_eq!(report.workers_flushed, 1);
        assert!(report.failed);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_shutdown_waits_for_the_loop() {
        let timer = PersistenceTimer::new(
            Arc::new(MetricsStreamProcessor::new()),
            Arc::new(TopNStreamProcessor::new()),
        );
        let dao: Arc<dyn BatchDao> = Arc::new(InMemoryBatchDao::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusMetrics::new().unwrap());

        timer.start(dao.clone(), metrics.clone(), RuntimeConfig::default());
        timer.start(dao, metrics, RuntimeConfig::default());

        tokio::time::advance(RuntimeConfig::INITIAL_DELAY).await;
        tokio::task::yield_now().await;

        timer.shutdown().await;
        assert!(timer.inner.task.lock().unwrap().is_none());
    }
}
