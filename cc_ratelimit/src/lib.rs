//! # cc_ratelimit
//!
//! Admission control for I/O-bound work: a sliding-window rate limiter, a
//! semaphore-backed concurrency limiter and the combination of the two.

pub mod combined;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod global;
pub mod sliding_window;
mod time;

pub use combined::CombinedLimiter;
pub use combined::CombinedPermit;
pub use concurrency::ConcurrencyLimiter;
pub use concurrency::ConcurrencyPermit;
pub use config::ConcurrencyConfig;
pub use config::RateLimitConfig;
pub use error::RateLimitError;
pub use error::Result;
pub use global::get_limiter;
pub use sliding_window::RateLimitInfo;
pub use sliding_window::RateLimiter;
pub use sliding_window::RateLimiterBuilder;
