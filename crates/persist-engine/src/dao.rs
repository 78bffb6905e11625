//! The batch storage boundary (spec §4.3) and an in-memory reference
//! implementation used by tests and the demonstration process (spec §4.3.1).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use persist_core::PreparedRequest;

/// Everything downstream of `buildBatchRequests`: a single async boundary a
/// storage driver implements to receive a worker's batch.
///
/// Boxed futures (rather than `async-trait`) keep this object-safe without
/// pulling in a macro dependency the rest of the stack doesn't otherwise need.
pub trait BatchDao: Send + Sync {
    fn flush<'a>(
        &'a self,
        requests: Vec<PreparedRequest>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// A reference [`BatchDao`] that holds flushed requests in memory.
///
/// Configurable to fail its first `N` calls and/or sleep before flushing, so
/// tests can exercise retry-adjacent and latency-adjacent tick behavior
/// without a real storage backend.
pub struct InMemoryBatchDao {
    log: Mutex<Vec<PreparedRequest>>,
    fail_remaining: AtomicUsize,
    delay: Duration,
}

impl InMemoryBatchDao {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Fails the next `times` calls to `flush` before succeeding.
    pub fn failing(times: usize) -> Self {
        Self {
            fail_remaining: AtomicUsize::new(times),
            ..Self::new()
        }
    }

    /// Sleeps `delay` before each flush, to simulate a slow storage backend.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Total number of requests successfully flushed so far.
    pub fn flushed_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl Default for InMemoryBatchDao {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchDao for InMemoryBatchDao {
    fn flush<'a>(
        &'a self,
        requests: Vec<PreparedRequest>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let mut remaining = self.fail_remaining.load(Ordering::SeqCst);
            while remaining > 0 {
                match self.fail_remaining.compare_exchange(
                    remaining,
                    remaining - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => anyhow::bail!("in-memory dao: simulated flush failure"),
                    Err(actual) => remaining = actual,
                }
            }

            self.log.lock().unwrap().extend(requests);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_accumulates_requests() {
        let dao = InMemoryBatchDao::new();
        dao.flush(vec![PreparedRequest::new("a", 1u32)])
            .await
            .unwrap();
        dao.flush(vec![PreparedRequest::new("b", 2u32)])
            .await
            .unwrap();
        assert_eq!(dao.flushed_count(), 2);
    }

    #[tokio::test]
    async fn failing_dao_fails_the_configured_number_of_times() {
        let dao = InMemoryBatchDao::failing(2);
        assert!(dao
            .flush(vec![PreparedRequest::new("a", 1u32)])
            .await
            .is_err());
        assert!(dao
            .flush(vec![PreparedRequest::new("a", 1u32)])
            .await
            .is_err());
        assert!(dao
            .flush(vec![PreparedRequest::new("a", 1u32)])
            .await
            .is_ok());
        assert_eq!(dao.flushed_count(), 1);
    }
}
