//! Error and report types for a single persistence tick (spec §7.1).

use thiserror::Error;

/// Failure modes a tick can surface. A single worker's failure does not stop
/// the others; this describes what went wrong with one worker's contribution.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to build a prepared request: {detail}")]
    BuildItemFailed { detail: String },

    #[error("batch flush failed: {0}")]
    Flush(#[source] anyhow::Error),

    #[error("a build task panicked: {0}")]
    WorkerPanicked(String),
}

/// What a single worker's slice of a tick produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerTickOutcome {
    pub flushed: bool,
    pub request_count: usize,
}

/// Summary of one completed persistence tick, across every registered
/// worker (spec §7.1). Exposed to callers (tests, the demo binary) via
/// [`crate::PersistenceTimer::last_tick`].
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub workers_considered: usize,
    pub workers_flushed: usize,
    pub requests_flushed: usize,
    pub failed: bool,
}
