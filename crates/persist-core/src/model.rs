use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Marker for anything that can live inside a worker's `WorkerCache`.
///
/// The persistence core never inspects an item's fields — it only buffers,
/// drains, and (for Top-N) orders items. Any `Send + 'static` value qualifies.
pub trait StorageItem: Send + 'static {}

impl<T: Send + 'static> StorageItem for T {}

/// An immutable schema descriptor identifying the storage target (table/index)
/// for a worker.
///
/// `Model` is created once per scope by an external model manager at system
/// boot and never mutated afterwards; this core only holds a reference to it.
#[derive(Clone)]
pub struct Model {
    name: Arc<str>,
}

impl Model {
    /// Names the storage target this model describes (e.g. a table or index name).
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    /// The target's name, as understood by the storage driver.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Model").field(&self.name).finish()
    }
}

/// An opaque, driver-specific write descriptor produced by a worker's
/// `buildBatchRequests` and consumed only by a `BatchDao`.
///
/// The core treats a `PreparedRequest` as a value with no identity: it never
/// inspects, compares, or reorders the payload, only collects requests into a
/// batch and hands the batch to the DAO. `label` exists purely so logs and
/// tests can describe a request without downcasting it.
pub struct PreparedRequest {
    label: &'static str,
    payload: Box<dyn Any + Send + Sync>,
}

impl PreparedRequest {
    /// Wraps a driver-specific payload. `label` is a short, static tag (e.g.
    /// `"metric.upsert"`) used only for logging/debugging.
    pub fn new<T: Send + Sync + 'static>(label: &'static str, payload: T) -> Self {
        Self {
            label,
            payload: Box::new(payload),
        }
    }

    /// The static tag passed to [`PreparedRequest::new`].
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Recovers the concrete payload a driver knows how to expect, if it
    /// matches `T`. Storage drivers downcast to their own request type here.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// The runtime knobs this core actually reads (spec §6). Loading these from
/// YAML/env/whatever is the host process's job; this crate only defines the
/// typed shape and its documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Tick period (`persistentPeriod`). Fixed-delay: the next tick begins
    /// this long after the previous tick *completes*.
    pub persistent_period: Duration,
    /// Build-pool width (`prepareThreads`).
    pub prepare_threads: usize,
    /// Minimum interval between two non-empty Top-N batches (`topNReportPeriod`).
    pub topn_report_period: Duration,
    /// Whether metrics workers maintain a session cache in `endOfRound`.
    pub enable_database_session: bool,
    /// Session-cache entry expiry used by the metrics worker's `endOfRound`
    /// policy, when `enable_database_session` is set.
    pub storage_session_timeout: Duration,
}

impl RuntimeConfig {
    /// `persistentPeriod` default: 25 seconds.
    pub const DEFAULT_PERSISTENT_PERIOD: Duration = Duration::from_secs(25);
    /// `prepareThreads` default: 2.
    pub const DEFAULT_PREPARE_THREADS: usize = 2;
    /// `topNReportPeriod` default: 10 minutes.
    pub const DEFAULT_TOPN_REPORT_PERIOD: Duration = Duration::from_secs(10 * 60);
    /// `storageSessionTimeout` default: 70,000 ms.
    pub const DEFAULT_STORAGE_SESSION_TIMEOUT: Duration = Duration::from_millis(70_000);
    /// Initial delay before the first tick, per spec §4.4 ("Startup").
    pub const INITIAL_DELAY: Duration = Duration::from_secs(5);

    /// Clamps knobs that would otherwise leave the scheduler stuck (zero
    /// build threads, zero tick period) to the smallest sane value. Mirrors
    /// the defensive normalization a host process's config layer would do
    /// before handing this to the engine.
    pub fn normalized(mut self) -> Self {
        if self.prepare_threads == 0 {
            self.prepare_threads = 1;
        }
        if self.persistent_period.is_zero() {
            self.persistent_period = Self::DEFAULT_PERSISTENT_PERIOD;
        }
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            persistent_period: Self::DEFAULT_PERSISTENT_PERIOD,
            prepare_threads: Self::DEFAULT_PREPARE_THREADS,
            topn_report_period: Self::DEFAULT_TOPN_REPORT_PERIOD,
            enable_database_session: false,
            storage_session_timeout: Self::DEFAULT_STORAGE_SESSION_TIMEOUT,
        }
    }
}
