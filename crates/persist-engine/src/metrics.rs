//! Instrumentation boundary (spec §4.7, §6): a bulk-error counter and three
//! latency histograms, exposed through a small trait so the scheduler never
//! depends on `prometheus` directly.

use prometheus::{Counter, Histogram, HistogramOpts, HistogramTimer, Opts, Registry};

/// What the scheduler needs from a metrics backend. `start_*_timer` returns a
/// [`HistogramTimer`], which records its sample on `Drop` — every exit path
/// out of a tick (success, build failure, flush failure, panic) is covered
/// without a manual try/finally.
pub trait MetricsSink: Send + Sync {
    fn inc_bulk_error(&self);
    fn start_prepare_timer(&self) -> HistogramTimer;
    fn start_execute_timer(&self) -> HistogramTimer;
    fn start_all_timer(&self) -> HistogramTimer;
}

/// The stable Prometheus metric names a scrape sees (spec §6).
pub const BULK_ERROR_COUNT: &str = "persistence_timer_bulk_error_count";
pub const BULK_PREPARE_LATENCY: &str = "persistence_timer_bulk_prepare_latency";
pub const BULK_EXECUTE_LATENCY: &str = "persistence_timer_bulk_execute_latency";
pub const BULK_ALL_LATENCY: &str = "persistence_timer_bulk_all_latency";

/// Prometheus-backed [`MetricsSink`]. Owns a private [`Registry`] rather than
/// registering into `prometheus::default_registry()`, so a host process
/// chooses how (or whether) to expose it, and tests can spin up as many
/// independent instances as they like.
pub struct PrometheusMetrics {
    registry: Registry,
    bulk_error_count: Counter,
    bulk_prepare_latency: Histogram,
    bulk_execute_latency: Histogram,
    bulk_all_latency: Histogram,
}

impl PrometheusMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let bulk_error_count = Counter::with_opts(Opts::new(
            BULK_ERROR_COUNT,
            "Number of persistence ticks that failed to flush at least one worker's batch",
        ))?;
        let bulk_prepare_latency = Histogram::with_opts(HistogramOpts::new(
            BULK_PREPARE_LATENCY,
            "Time spent building a worker's batch requests, per worker",
        ))?;
        let bulk_execute_latency = Histogram::with_opts(HistogramOpts::new(
            BULK_EXECUTE_LATENCY,
            "Time spent flushing a worker's batch requests through the DAO",
        ))?;
        let bulk_all_latency = Histogram::with_opts(HistogramOpts::new(
            BULK_ALL_LATENCY,
            "Wall-clock time of a whole persistence tick, across all workers",
        ))?;

        registry.register(Box::new(bulk_error_count.clone()))?;
        registry.register(Box::new(bulk_prepare_latency.clone()))?;
        registry.register(Box::new(bulk_execute_latency.clone()))?;
        registry.register(Box::new(bulk_all_latency.clone()))?;

        Ok(Self {
            registry,
            bulk_error_count,
            bulk_prepare_latency,
            bulk_execute_latency,
            bulk_all_latency,
        })
    }

    /// The registry a host process can scrape (e.g. via a `/metrics` endpoint).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsSink for PrometheusMetrics {
    fn inc_bulk_error(&self) {
        self.bulk_error_count.inc();
    }

    fn start_prepare_timer(&self) -> HistogramTimer {
        self.bulk_prepare_latency.start_timer()
    }

    fn start_execute_timer(&self) -> HistogramTimer {
        self.bulk_execute_latency.start_timer()
    }

    fn start_all_timer(&self) -> HistogramTimer {
        self.bulk_all_latency.start_timer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_the_four_spec_metrics() {
        let metrics = PrometheusMetrics::new().unwrap();
        let names: Vec<String> = metrics
            .registry()
            .gather()
            .into_iter()
            .map(|family| family.name().to_string())
            .collect();
        assert!(names.contains(&BULK_ERROR_COUNT.to_string()));
        assert!(names.contains(&BULK_PREPARE_LATENCY.to_string()));
        assert!(names.contains(&BULK_EXECUTE_LATENCY.to_string()));
        assert!(names.contains(&BULK_ALL_LATENCY.to_string()));
    }

    #[test]
    fn bulk_error_count_increments() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.inc_bulk_error();
        metrics.inc_bulk_error();
        assert_eq!(metrics.bulk_error_count.get(), 2.0);
    }

    #[test]
    fn timer_records_a_sample_on_drop() {
        let metrics = PrometheusMetrics::new().unwrap();
        {
            let _timer = metrics.start_prepare_timer();
        }
        assert_eq!(metrics.bulk_prepare_latency.get_sample_count(), 1);
    }
}
