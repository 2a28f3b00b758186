use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tokio::time::Instant;

/// Current wall-clock time in seconds since the Unix epoch
#[inline]
pub(crate) fn unix_now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs_f64()).unwrap_or_default()
}

/// Projects a monotonic instant onto the wall clock
///
/// Limiters keep monotonic time internally so a paused test clock drives them,
/// but callers are handed absolute epoch timestamps.
pub(crate) fn to_unix_secs(at: Instant) -> f64 {
    let now = Instant::now();
    let wall = unix_now_secs();
    if at >= now { wall + (at - now).as_secs_f64() } else { wall - (now - at).as_secs_f64() }
}
