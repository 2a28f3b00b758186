use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ConcurrencyConfig;
use crate::error::Result;

/// Bounds the number of operations in flight at once
///
/// Cloning is cheap and clones share the same slots.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,

    /// Slots currently held, only touched under the lock
    active: Arc<Mutex<usize>>,

    max_concurrent: usize,
}

/// A held concurrency slot
///
/// Dropping it, on any path including panics and cancelled futures, gives the
/// slot back.
pub struct ConcurrencyPermit {
    active: Arc<Mutex<usize>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        // `_permit` is released after this body returns
    }
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self { semaphore: Arc::new(Semaphore::new(max_concurrent)), active: Arc::new(Mutex::new(0)), max_concurrent }
    }

    pub fn from_config(config: &ConcurrencyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.max_concurrent))
    }

    /// Wait for a free slot and hold it until the permit is dropped
    pub async fn acquire(&self) -> ConcurrencyPermit {
        // The semaphore is private and never closed
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.expect("Concurrency semaphore closed");

        {
            let mut active = self.active.lock();
            *active += 1;
            debug_assert!(*active <= self.max_concurrent);
        }

        ConcurrencyPermit { active: Arc::clone(&self.active), _permit: permit }
    }

    /// Run `f` while holding a slot
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }

    /// Probe whether a slot can be obtained within `timeout`
    ///
    /// The slot is released again straight away; this reserves nothing.
    /// `None` waits indefinitely.
    pub async fn wait_for_slot(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
                Ok(permit) => permit.is_ok(),
                Err(_) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "Timed out waiting for concurrency slot");
                    false
                }
            },
            None => self.semaphore.acquire().await.is_ok(),
        }
    }

    /// Operations currently holding a slot
    pub fn active_count(&self) -> usize {
        *self.active.lock()
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.max_concurrent - self.active_count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(ConcurrencyConfig::default().max_concurrent)
    }
}
