use std::time::Duration;

use clap::Parser;

use persist_core::RuntimeConfig;

/// Runtime knobs for the persistence timer demonstration process (spec §6.1).
/// Durations are taken in milliseconds on the command line since `Duration`
/// itself has no `Display` impl for clap to render as a default value.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "persist-server",
    version,
    about = "Periodic batched persistence pipeline demo"
)]
pub struct Cli {
    /// Tick period, in milliseconds (`persistentPeriod`).
    #[arg(
        long = "persistent-period-ms",
        env = "PERSIST_PERIOD_MS",
        default_value_t = RuntimeConfig::DEFAULT_PERSISTENT_PERIOD.as_millis() as u64
    )]
    pub persistent_period_ms: u64,

    /// Build-pool width (`prepareThreads`).
    #[arg(
        long = "prepare-threads",
        env = "PERSIST_PREPARE_THREADS",
        default_value_t = RuntimeConfig::DEFAULT_PREPARE_THREADS
    )]
    pub prepare_threads: usize,

    /// Minimum interval between two non-empty Top-N batches, in milliseconds
    /// (`topNReportPeriod`).
    #[arg(
        long = "topn-report-period-ms",
        env = "PERSIST_TOPN_REPORT_PERIOD_MS",
        default_value_t = RuntimeConfig::DEFAULT_TOPN_REPORT_PERIOD.as_millis() as u64
    )]
    pub topn_report_period_ms: u64,

    /// Whether metrics workers maintain a session cache in `endOfRound`.
    #[arg(
        long = "enable-database-session",
        env = "PERSIST_ENABLE_DB_SESSION",
        default_value_t = false
    )]
    pub enable_database_session: bool,

    /// Session-cache entry expiry, in milliseconds, when
    /// `--enable-database-session` is set (`storageSessionTimeout`).
    #[arg(
        long = "storage-session-timeout-ms",
        env = "PERSIST_STORAGE_SESSION_TIMEOUT_MS",
        default_value_t = RuntimeConfig::DEFAULT_STORAGE_SESSION_TIMEOUT.as_millis() as u64
    )]
    pub storage_session_timeout_ms: u64,

    /// `tracing-subscriber` env-filter directive (e.g. `persist_engine=debug`).
    #[arg(long = "log-filter", env = "PERSIST_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

impl Cli {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            persistent_period: Duration::from_millis(self.persistent_period_ms),
            prepare_threads: self.prepare_threads,
            topn_report_period: Duration::from_millis(self.topn_report_period_ms),
            enable_database_session: self.enable_database_session,
            storage_session_timeout: Duration::from_millis(self.storage_session_timeout_ms),
        }
        .normalized()
    }
}
