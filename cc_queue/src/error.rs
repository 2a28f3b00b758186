use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Failure of a single queued item, delivered to its callback
///
/// Serializes as `{"error": "<message>"}`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{error}")]
pub struct HandlerError {
    pub error: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}
