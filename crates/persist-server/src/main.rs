mod cli;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use persist_core::Model;
use persist_engine::{
    InMemoryBatchDao, MappedRequest, MetricsPersistentWorker, MetricsStreamProcessor,
    PersistenceTimer, PrometheusMetrics, TopNPersistentWorker, TopNStreamProcessor,
};

use crate::cli::Cli;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_filter.clone()))
        .init();

    let config = cli.runtime_config();
    tracing::info!(?config, "starting persistence timer demo");

    let metrics_registry = Arc::new(MetricsStreamProcessor::new());
    let topn_registry = Arc::new(TopNStreamProcessor::new());

    let latency_mapper: Arc<_> = Arc::new(|sample: &u64| {
        Ok(MappedRequest {
            request: persist_core::PreparedRequest::new("metric.latency_sample", *sample),
            session_key: Some("latency".to_string()),
        })
    });
    let latency_worker = Arc::new(MetricsPersistentWorker::new(
        "latency-metrics",
        Model::new("demo.latency"),
        config.enable_database_session,
        config.storage_session_timeout,
        latency_mapper,
    ));
    metrics_registry.register(latency_worker.clone());

    let slow_query_mapper: Arc<_> = Arc::new(|duration_ms: &u64| {
        Ok(persist_core::PreparedRequest::new(
            "topn.slow_query",
            *duration_ms,
        ))
    });
    let slow_query_worker = Arc::new(TopNPersistentWorker::new(
        "slow-queries",
        Model::new("demo.slow_query"),
        10,
        config.topn_report_period,
        slow_query_mapper,
    ));
    topn_registry.register(slow_query_worker.clone());

    let dao: Arc<InMemoryBatchDao> = Arc::new(InMemoryBatchDao::new());
    let metrics: Arc<PrometheusMetrics> = Arc::new(PrometheusMetrics::new()?);

    let timer = PersistenceTimer::new(metrics_registry, topn_registry);
    timer.start(dao.clone(), metrics.clone(), config);

    let mut tick_reports = timer.last_tick();
    tokio::spawn(async move {
        loop {
            if tick_reports.changed().await.is_err() {
                return;
            }
            if let Some(report) = tick_reports.borrow().clone() {
                tracing::info!(
                    workers_considered = report.workers_considered,
                    workers_flushed = report.workers_flushed,
                    requests_flushed = report.requests_flushed,
                    failed = report.failed,
                    "persistence tick completed"
                );
            }
        }
    });

    let producer_latency_worker = latency_worker.clone();
    let producer_slow_query_worker = slow_query_worker.clone();
    let producer = tokio::spawn(async move {
        let mut sample = 0u64;
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            sample = sample.wrapping_add(1);
            producer_latency_worker.offer(sample % 200);
            producer_slow_query_worker.offer((sample * 7) % 500);
        }
    });

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    loop {
        match shutdown_rx.recv().await {
            Some(ShutdownEvent::Graceful) => {
                tracing::info!("shutdown requested; finishing the in-flight tick before exiting");
                break;
            }
            Some(ShutdownEvent::Immediate) => {
                tracing::warn!("shutdown requested again; exiting immediately");
                producer.abort();
                std::process::exit(130);
            }
            None => break,
        }
    }

    producer.abort();
    timer.shutdown().await;
    tracing::info!(flushed = dao.flushed_count(), "shutdown complete");
    Ok(())
}
