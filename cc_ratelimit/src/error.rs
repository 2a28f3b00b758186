use thiserror::Error;

/// Result type for limiter construction
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors raised while building limiters
///
/// Admission itself never fails: callers are delayed, not rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(&'static str),
}
