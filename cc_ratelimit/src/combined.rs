use std::future::Future;

use tracing::info;

use crate::concurrency::ConcurrencyLimiter;
use crate::concurrency::ConcurrencyPermit;
use crate::config::ConcurrencyConfig;
use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::sliding_window::RateLimitInfo;
use crate::sliding_window::RateLimiter;

/// Rate gate followed by a concurrency slot
///
/// A call is admitted by the sliding window first and only then competes for
/// a concurrency slot, so a caller held back by the rate limit never occupies
/// a slot while waiting.
pub struct CombinedLimiter {
    rate: RateLimiter,
    concurrency: ConcurrencyLimiter,
}

/// Admission through both gates; the concurrency slot is held until drop
pub struct CombinedPermit {
    info: RateLimitInfo,
    _slot: ConcurrencyPermit,
}

impl CombinedPermit {
    /// Rate window state at admission
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }
}

impl CombinedLimiter {
    pub fn new(rate: RateLimiter, concurrency: ConcurrencyLimiter) -> Self {
        info!(
            max_requests = rate.max_requests(),
            window_secs = rate.window().as_secs(),
            max_concurrent = concurrency.max_concurrent(),
            "Combined limiter created"
        );
        Self { rate, concurrency }
    }

    /// Per-minute rate limit with a concurrency ceiling
    pub fn with_limits(requests_per_minute: u32, max_concurrent: usize) -> Self {
        Self::new(RateLimiter::per_minute(requests_per_minute), ConcurrencyLimiter::new(max_concurrent))
    }

    pub fn from_config(rate: &RateLimitConfig, concurrency: &ConcurrencyConfig) -> Result<Self> {
        Ok(Self::new(RateLimiter::from_config(rate)?, ConcurrencyLimiter::from_config(concurrency)?))
    }

    /// Pass the rate gate, then take a concurrency slot
    pub async fn acquire(&self) -> CombinedPermit {
        let info = self.rate.acquire().await;
        let slot = self.concurrency.acquire().await;

        CombinedPermit { info, _slot: slot }
    }

    /// Run `f` once admitted, holding the slot until it completes
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(RateLimitInfo) -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire().await;
        f(permit.info).await
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate
    }

    pub fn concurrency_limiter(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }
}
