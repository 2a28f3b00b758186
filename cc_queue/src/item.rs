use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::HandlerError;
use crate::priority::Priority;

/// Completion hook run once per processed item
pub type Callback<R> = Box<dyn FnOnce(Result<R, HandlerError>) -> BoxFuture<'static, ()> + Send>;

/// Box an async closure into a [`Callback`]
pub fn callback<R, F, Fut>(f: F) -> Callback<R>
where
    F: FnOnce(Result<R, HandlerError>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |result| Box::pin(f(result)))
}

/// A pending unit of work
///
/// Ordered by priority, then by enqueue order. The enqueue instant is taken
/// from the monotonic clock, so a wall clock stepping backwards cannot
/// reorder items. `request_id`, `data` and `callback` never take part in the
/// comparison.
pub struct QueueItem<T, R> {
    pub priority: Priority,

    /// Enqueue time in seconds since the Unix epoch, informational only
    pub timestamp: f64,

    pub request_id: String,

    pub data: T,

    pub callback: Option<Callback<R>>,

    enqueued_at: Instant,

    /// Breaks ties between equal clock readings so they stay FIFO
    sequence: u64,
}

impl<T, R> QueueItem<T, R> {
    pub(crate) fn new(request_id: String, data: T, priority: Priority, callback: Option<Callback<R>>, sequence: u64) -> Self {
        Self { priority, timestamp: unix_now_secs(), request_id, data, callback, enqueued_at: Instant::now(), sequence }
    }

    fn sort_key(&self) -> (Priority, Instant, u64) {
        (self.priority, self.enqueued_at, self.sequence)
    }
}

impl<T, R> PartialEq for QueueItem<T, R> {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl<T, R> Eq for QueueItem<T, R> {}

impl<T, R> PartialOrd for QueueItem<T, R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, R> Ord for QueueItem<T, R> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl<T: fmt::Debug, R> fmt::Debug for QueueItem<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("priority", &self.priority)
            .field("timestamp", &self.timestamp)
            .field("request_id", &self.request_id)
            .field("data", &self.data)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[inline]
fn unix_now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs_f64()).unwrap_or_default()
}
