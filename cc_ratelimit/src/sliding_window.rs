use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::error::Result;
use crate::time::to_unix_secs;
use crate::time::unix_now_secs;

/// Snapshot of a rate limiter's window, produced by every `acquire`/`check`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitInfo {
    /// Maximum requests allowed per window
    pub limit: u32,

    /// `limit` minus the requests tracked in the window
    ///
    /// Not clamped at zero; a negative value means the window is over budget.
    pub remaining: i64,

    /// Seconds since the Unix epoch at which the oldest tracked request leaves the window
    pub reset_at: f64,
}

impl RateLimitInfo {
    /// Seconds until `reset_at`, never negative
    pub fn retry_after(&self) -> f64 {
        (self.reset_at - unix_now_secs()).max(0.0)
    }
}

/// Sliding-window rate limiter
///
/// Remembers the instant of every admitted request still inside the window.
/// A caller arriving at a full window is suspended until the oldest request
/// expires. Admissions are serialized through one async lock so concurrent
/// callers queue up behind it in arrival order and never double-count.
pub struct RateLimiter {
    /// Held for the whole admission, including the window wait
    admission: tokio::sync::Mutex<()>,

    /// Admitted request instants, oldest first
    requests: parking_lot::Mutex<VecDeque<Instant>>,

    max_requests: u32,

    window: Duration,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`
    pub fn new(max_requests: u32, window: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be greater than 0");
        assert!(!window.is_zero(), "Window duration must be greater than 0");

        Self {
            admission: tokio::sync::Mutex::new(()),
            requests: parking_lot::Mutex::new(VecDeque::with_capacity((max_requests as usize).min(1024))),
            max_requests,
            window,
        }
    }

    /// Create a limiter with a one-second window
    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    /// Create a limiter with a one-minute window
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        let (max_requests, window) = config.resolve()?;
        Ok(Self::new(max_requests, window))
    }

    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop every instant at least one window old
    #[inline]
    fn prune(&self, requests: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = requests.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn info(&self, tracked: usize, reset: Instant) -> RateLimitInfo {
        RateLimitInfo { limit: self.max_requests, remaining: i64::from(self.max_requests) - tracked as i64, reset_at: to_unix_secs(reset) }
    }

    /// Wait for room in the window, then record a request
    ///
    /// Never fails. Blocks at most one window length once it holds the
    /// admission lock.
    pub async fn acquire(&self) -> RateLimitInfo {
        let _admission = self.admission.lock().await;

        let wait = {
            let mut requests = self.requests.lock();
            let now = Instant::now();
            self.prune(&mut requests, now);

            if requests.len() >= self.max_requests as usize {
                requests.front().map(|&oldest| (oldest + self.window).saturating_duration_since(now))
            } else {
                None
            }
        };

        if let Some(wait) = wait
            && !wait.is_zero()
        {
            debug!(wait_ms = wait.as_millis() as u64, limit = self.max_requests, "Rate limit reached, waiting for window space");
            tokio::time::sleep(wait).await;
        }

        let mut requests = self.requests.lock();
        let now = Instant::now();
        self.prune(&mut requests, now);
        requests.push_back(now);

        self.info(requests.len(), now + self.window)
    }

    /// Read the current window without blocking or recording a request
    pub async fn check(&self) -> RateLimitInfo {
        let mut requests = self.requests.lock();
        let now = Instant::now();
        self.prune(&mut requests, now);

        let reset = requests.front().map_or(now + self.window, |&oldest| oldest + self.window);
        self.info(requests.len(), reset)
    }

    /// Run `f` once admitted
    ///
    /// Nothing happens on exit: the window frees itself as time passes.
    pub async fn limited<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(RateLimitInfo) -> Fut,
        Fut: Future<Output = T>,
    {
        let info = self.acquire().await;
        f(info).await
    }
}

/// Builder for a sliding-window rate limiter
#[derive(Debug, Default)]
pub struct RateLimiterBuilder {
    max_requests: Option<u32>,
    window: Option<Duration>,
}

impl RateLimiterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum requests per window
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    /// Set the window duration
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set window to 1 second
    pub fn per_second(self, max_requests: u32) -> Self {
        self.max_requests(max_requests).window(Duration::from_secs(1))
    }

    /// Set window to 1 minute
    pub fn per_minute(self, max_requests: u32) -> Self {
        self.max_requests(max_requests).window(Duration::from_secs(60))
    }

    pub fn build(self) -> Result<RateLimiter> {
        let max_requests = self.max_requests.filter(|&max| max > 0).ok_or(RateLimitError::InvalidConfig("max_requests must be set and greater than 0"))?;
        let window = self.window.filter(|window| !window.is_zero()).ok_or(RateLimitError::InvalidConfig("window must be set and greater than 0"))?;

        Ok(RateLimiter::new(max_requests, window))
    }
}
