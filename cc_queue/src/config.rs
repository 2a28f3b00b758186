use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::QueueError;
use crate::error::Result;

/// Queue capacity and worker pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Used in worker names and log fields
    pub name: String,
    pub max_size: usize,
    pub num_workers: usize,
    /// Longest a single `dequeue` waits on an empty queue
    pub poll_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { name: "requests".to_string(), max_size: 1000, num_workers: 5, poll_timeout_ms: 1000 }
    }
}

impl QueueConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(QueueError::InvalidConfig("max_size must be greater than 0"));
        }
        if self.num_workers == 0 {
            return Err(QueueError::InvalidConfig("num_workers must be greater than 0"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(QueueError::InvalidConfig("poll_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}
