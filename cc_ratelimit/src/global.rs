//! Process-wide combined limiter
//!
//! Prefer building a [`CombinedLimiter`] at startup and sharing it through an
//! `Arc`. This holder exists for call sites that cannot be handed one.

use std::sync::OnceLock;

use tracing::debug;

use crate::combined::CombinedLimiter;

static GLOBAL_LIMITER: OnceLock<CombinedLimiter> = OnceLock::new();

/// Shared limiter for the whole process
///
/// The first call fixes the configuration for the lifetime of the process.
/// Later calls return the same instance and ignore their arguments.
///
/// # Panics
/// Panics if the first call passes a zero limit.
pub fn get_limiter(requests_per_minute: u32, max_concurrent: usize) -> &'static CombinedLimiter {
    let limiter = GLOBAL_LIMITER.get_or_init(|| CombinedLimiter::with_limits(requests_per_minute, max_concurrent));

    if limiter.rate_limiter().max_requests() != requests_per_minute || limiter.concurrency_limiter().max_concurrent() != max_concurrent {
        debug!(
            requests_per_minute,
            max_concurrent,
            configured_rpm = limiter.rate_limiter().max_requests(),
            configured_max_concurrent = limiter.concurrency_limiter().max_concurrent(),
            "Global limiter already initialised, ignoring new limits"
        );
    }

    limiter
}
