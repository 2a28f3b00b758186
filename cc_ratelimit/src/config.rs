use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RateLimitError;
use crate::error::Result;

/// Sliding-window limits
///
/// `requests_per_second` takes priority when non-zero and narrows the window
/// to one second; otherwise the window is one minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_minute: 60, requests_per_second: 0 }
    }
}

impl RateLimitConfig {
    /// Per-minute limit
    pub fn per_minute(requests: u32) -> Self {
        Self { requests_per_minute: requests, requests_per_second: 0 }
    }

    /// Per-second limit
    pub fn per_second(requests: u32) -> Self {
        Self { requests_per_minute: 0, requests_per_second: requests }
    }

    /// Resolve to `(max_requests, window)`
    pub fn resolve(&self) -> Result<(u32, Duration)> {
        if self.requests_per_second > 0 {
            Ok((self.requests_per_second, Duration::from_secs(1)))
        } else if self.requests_per_minute > 0 {
            Ok((self.requests_per_minute, Duration::from_secs(60)))
        } else {
            Err(RateLimitError::InvalidConfig("requests_per_minute or requests_per_second must be greater than 0"))
        }
    }
}

/// Concurrent in-flight operation ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_concurrent: 100 }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(RateLimitError::InvalidConfig("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}
