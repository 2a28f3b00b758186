use std::any::Any;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::config::QueueConfig;
use crate::error::HandlerError;
use crate::error::Result;
use crate::item::Callback;
use crate::item::QueueItem;
use crate::priority::Priority;

/// Point-in-time view of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub max_size: usize,
    pub num_workers: usize,
    pub running: bool,
    pub processed: u64,
    pub errors: u64,
}

/// State shared between the queue handle and its workers
struct Shared<T, R> {
    name: String,
    heap: Mutex<BinaryHeap<Reverse<QueueItem<T, R>>>>,
    /// Signalled once per enqueue
    available: Notify,
    /// Signalled by `stop_workers`
    shutdown: Notify,
    running: AtomicBool,
    processed: AtomicU64,
    errors: AtomicU64,
    sequence: AtomicU64,
    max_size: usize,
    num_workers: usize,
    poll_timeout: Duration,
}

impl<T, R> Shared<T, R> {
    /// Pop the smallest item, waiting at most `poll_timeout` on an empty queue
    async fn dequeue(&self) -> Option<QueueItem<T, R>> {
        let deadline = Instant::now() + self.poll_timeout;

        loop {
            // Register interest before looking so an enqueue in between is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(Reverse(item)) = self.heap.lock().pop() {
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    async fn process<H, Fut, E>(&self, item: QueueItem<T, R>, handler: &H)
    where
        H: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Display,
    {
        let QueueItem { request_id, data, callback, priority, .. } = item;

        let outcome = AssertUnwindSafe(async { handler(data).await }).catch_unwind().await;

        let result = match outcome {
            Ok(Ok(value)) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %request_id, ?priority, "Request processed");
                Ok(value)
            }
            Ok(Err(err)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(request_id = %request_id, error = %err, "Request handler failed");
                Err(HandlerError::new(err.to_string()))
            }
            Err(panic) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(panic.as_ref());
                warn!(request_id = %request_id, error = %message, "Request handler panicked");
                Err(HandlerError::new(message))
            }
        };

        if let Some(callback) = callback
            && AssertUnwindSafe(async move { callback(result).await }).catch_unwind().await.is_err()
        {
            warn!(request_id = %request_id, "Request callback panicked");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

async fn worker_loop<T, R, H, Fut, E>(shared: Arc<Shared<T, R>>, handler: Arc<H>)
where
    H: Fn(T) -> Fut,
    Fut: Future<Output = std::result::Result<R, E>>,
    E: Display,
{
    debug!("Worker started");

    while shared.running.load(Ordering::Acquire) {
        let item = tokio::select! {
            biased;
            _ = shared.shutdown.notified() => break,
            item = shared.dequeue() => item,
        };

        // Empty poll, go round and look at the running flag again
        let Some(item) = item else { continue };

        shared.process(item, handler.as_ref()).await;
    }

    debug!("Worker exiting");
}

/// Bounded priority queue with a fixed pool of worker tasks
///
/// Producers call [`enqueue`](Self::enqueue), which never blocks and rejects
/// when the queue is full. Once [`start_workers`](Self::start_workers) has
/// run, `num_workers` tasks pull the highest priority, oldest item and pass
/// its data to the shared handler. A handler error or panic is counted and
/// handed to the item's callback; it never takes the worker down.
pub struct PriorityRequestQueue<T, R> {
    shared: Arc<Shared<T, R>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, R> PriorityRequestQueue<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Create a queue with the default name and a one second poll timeout
    pub fn new(max_size: usize, num_workers: usize) -> Self {
        let defaults = QueueConfig::default();
        let poll_timeout = defaults.poll_timeout();
        Self::with_settings(defaults.name, max_size, num_workers, poll_timeout)
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_settings(config.name.clone(), config.max_size, config.num_workers, config.poll_timeout()))
    }

    fn with_settings(name: String, max_size: usize, num_workers: usize, poll_timeout: Duration) -> Self {
        assert!(max_size > 0, "max_size must be greater than 0");
        assert!(num_workers > 0, "num_workers must be greater than 0");

        Self {
            shared: Arc::new(Shared {
                name,
                heap: Mutex::new(BinaryHeap::with_capacity(max_size.min(1024))),
                available: Notify::new(),
                shutdown: Notify::new(),
                running: AtomicBool::new(false),
                processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
                max_size,
                num_workers,
                poll_timeout,
            }),
            workers: Mutex::new(Vec::with_capacity(num_workers)),
        }
    }

    /// Add an item, or return `false` straight away if the queue is full
    pub fn enqueue(&self, request_id: impl Into<String>, data: T, priority: Priority, callback: Option<Callback<R>>) -> bool {
        let request_id = request_id.into();

        {
            let mut heap = self.shared.heap.lock();
            if heap.len() >= self.shared.max_size {
                warn!(queue = %self.shared.name, request_id = %request_id, max_size = self.shared.max_size, "Queue full, rejecting request");
                return false;
            }

            let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %self.shared.name, request_id = %request_id, ?priority, depth = heap.len() + 1, "Request enqueued");
            heap.push(Reverse(QueueItem::new(request_id, data, priority, callback, sequence)));
        }

        self.shared.available.notify_one();
        true
    }

    /// Take the next item, or `None` if nothing arrives within the poll timeout
    pub async fn dequeue(&self) -> Option<QueueItem<T, R>> {
        self.shared.dequeue().await
    }

    /// Spawn the worker pool; does nothing if it is already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_workers<H, Fut, E>(&self, handler: H)
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        // Taken before the flag so a concurrent stop sees either none or all of the new workers
        let mut workers = self.workers.lock();
        if self.shared.running.swap(true, Ordering::AcqRel) {
            debug!(queue = %self.shared.name, "Workers already running");
            return;
        }

        let handler = Arc::new(handler);

        for index in 0..self.shared.num_workers {
            let span = info_span!("queue_worker", worker = %format!("{}-worker-{index}", self.shared.name));
            let worker = worker_loop(Arc::clone(&self.shared), Arc::clone(&handler)).instrument(span);
            workers.push(tokio::spawn(worker));
        }

        info!(queue = %self.shared.name, workers = self.shared.num_workers, "Queue workers started");
    }

    /// Stop the pool and wait for every worker to finish its current item
    ///
    /// Worker failures are logged, not returned.
    pub async fn stop_workers(&self) {
        let workers = {
            let mut workers = self.workers.lock();
            self.shared.running.store(false, Ordering::Release);
            self.shared.shutdown.notify_waiters();
            std::mem::take(&mut *workers)
        };

        for worker in workers {
            if let Err(err) = worker.await {
                error!(queue = %self.shared.name, error = %err, "Queue worker ended abnormally");
            }
        }

        info!(queue = %self.shared.name, "Queue workers stopped");
    }

    /// Drop every pending item without processing it
    ///
    /// Items a worker has already taken are unaffected.
    pub fn clear(&self) -> usize {
        let mut heap = self.shared.heap.lock();
        let dropped = heap.len();
        heap.clear();

        if dropped > 0 {
            debug!(queue = %self.shared.name, dropped, "Queue cleared");
        }
        dropped
    }

    pub fn size(&self) -> usize {
        self.shared.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            size: self.size(),
            max_size: self.shared.max_size,
            num_workers: self.shared.num_workers,
            running: self.is_running(),
            processed: self.shared.processed.load(Ordering::Relaxed),
            errors: self.shared.errors.load(Ordering::Relaxed),
        }
    }
}

impl<T, R> Drop for PriorityRequestQueue<T, R> {
    fn drop(&mut self) {
        // Detached workers would otherwise keep polling forever
        self.shared.running.store(false, Ordering::Release);
        self.shared.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;
    use crate::item::callback;

    type Outcomes = Arc<Mutex<Vec<(u32, std::result::Result<u32, HandlerError>)>>>;

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    fn recording_callback(outcomes: &Outcomes, input: u32) -> Option<Callback<u32>> {
        let outcomes = Arc::clone(outcomes);
        Some(callback(move |result| async move {
            outcomes.lock().push((input, result));
        }))
    }

    async fn doubling_handler(input: u32) -> std::result::Result<u32, String> {
        if input == 0 { Err("zero is not allowed".to_string()) } else { Ok(input * 2) }
    }

    #[tokio::test]
    async fn test_enqueue_dequeue() {
        let queue: PriorityRequestQueue<&str, ()> = PriorityRequestQueue::new(10, 1);

        assert!(queue.enqueue("req1", "test", Priority::Normal, None));
        assert_eq!(queue.size(), 1);

        let item = queue.dequeue().await.unwrap();
        assert_eq!(item.request_id, "req1");
        assert_eq!(item.data, "test");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue: PriorityRequestQueue<u32, ()> = PriorityRequestQueue::new(2, 1);

        assert!(queue.enqueue("req1", 1, Priority::Normal, None));
        assert!(queue.enqueue("req2", 2, Priority::Normal, None));
        assert!(!queue.enqueue("req3", 3, Priority::High, None));
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let queue: PriorityRequestQueue<(), ()> = PriorityRequestQueue::new(10, 1);

        queue.enqueue("low", (), Priority::Low, None);
        queue.enqueue("high", (), Priority::High, None);
        queue.enqueue("normal", (), Priority::Normal, None);

        assert_eq!(queue.dequeue().await.unwrap().request_id, "high");
        assert_eq!(queue.dequeue().await.unwrap().request_id, "normal");
        assert_eq!(queue.dequeue().await.unwrap().request_id, "low");
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue: PriorityRequestQueue<(), ()> = PriorityRequestQueue::new(10, 1);

        queue.enqueue("a", (), Priority::Normal, None);
        queue.enqueue("b", (), Priority::Normal, None);

        assert_eq!(queue.dequeue().await.unwrap().request_id, "a");
        assert_eq!(queue.dequeue().await.unwrap().request_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_empty_times_out() {
        let queue: PriorityRequestQueue<(), ()> = PriorityRequestQueue::new(10, 1);
        let start = Instant::now();

        assert!(queue.dequeue().await.is_none());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(PriorityRequestQueue::<u32, ()>::new(10, 1));

        let consumer = Arc::clone(&queue);
        let handle = tokio::spawn(async move { consumer.dequeue().await.map(|item| item.data) });
        tokio::task::yield_now().await;

        let start = Instant::now();
        queue.enqueue("late", 42, Priority::Normal, None);

        assert_eq!(handle.await.unwrap(), Some(42));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_workers_process_and_isolate_errors() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 2);
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue("bad", 0, Priority::High, recording_callback(&outcomes, 0));
        queue.enqueue("good1", 1, Priority::Normal, recording_callback(&outcomes, 1));
        queue.enqueue("good2", 2, Priority::Low, recording_callback(&outcomes, 2));

        queue.start_workers(doubling_handler);
        wait_until(|| outcomes.lock().len() == 3).await;
        queue.stop_workers().await;

        let stats = queue.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.errors, 1);
        assert!(!stats.running);

        let mut outcomes = outcomes.lock().clone();
        outcomes.sort_by_key(|(input, _)| *input);
        assert_eq!(outcomes[0].1, Err(HandlerError::new("zero is not allowed")));
        assert_eq!(outcomes[1].1, Ok(2));
        assert_eq!(outcomes[2].1, Ok(4));
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_kill_worker() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 1);
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue("explodes", 13, Priority::High, recording_callback(&outcomes, 13));
        queue.enqueue("fine", 5, Priority::Low, recording_callback(&outcomes, 5));

        queue.start_workers(|input: u32| async move {
            if input == 13 {
                panic!("unlucky input");
            }
            Ok::<_, String>(input)
        });
        wait_until(|| outcomes.lock().len() == 2).await;
        queue.stop_workers().await;

        let outcomes = outcomes.lock().clone();
        assert_eq!(outcomes[0], (13, Err(HandlerError::new("unlucky input"))));
        assert_eq!(outcomes[1], (5, Ok(5)));
        assert_eq!(queue.stats().errors, 1);
        assert_eq!(queue.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_items_without_callback_are_counted() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 1);
        queue.enqueue("silent", 3, Priority::Normal, None);

        queue.start_workers(doubling_handler);
        wait_until(|| queue.stats().processed == 1).await;
        queue.stop_workers().await;
    }

    #[tokio::test]
    async fn test_start_workers_is_idempotent() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 3);

        queue.start_workers(doubling_handler);
        queue.start_workers(doubling_handler);
        assert_eq!(queue.workers.lock().len(), 3);
        assert!(queue.is_running());

        queue.stop_workers().await;
        assert!(queue.workers.lock().is_empty());
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_stop_returns_promptly_when_idle() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 4);
        queue.start_workers(doubling_handler);
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_millis(1500), queue.stop_workers()).await.expect("workers did not stop");

        // Nothing drains the queue once stopped
        queue.enqueue("after", 1, Priority::Normal, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_item() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 1);
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue("slow", 7, Priority::Normal, recording_callback(&outcomes, 7));
        queue.start_workers(|input: u32| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, String>(input)
        });
        wait_until(|| queue.is_empty()).await;

        // Handler is still sleeping; stop must let it finish
        assert!(outcomes.lock().is_empty());
        queue.stop_workers().await;

        assert_eq!(*outcomes.lock(), vec![(7, Ok(7))]);
        assert_eq!(queue.stats().processed, 1);

        // Nothing fires twice after the pool is gone
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(outcomes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_while_running_skips_pending() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 1);
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=4 {
            queue.enqueue(format!("req{n}"), n, Priority::Normal, recording_callback(&outcomes, n));
        }
        queue.start_workers(|input: u32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>(input)
        });
        wait_until(|| queue.size() == 3).await;

        // The first item is already with the worker
        assert_eq!(queue.clear(), 3);
        wait_until(|| outcomes.lock().len() == 1).await;
        queue.stop_workers().await;

        assert_eq!(*outcomes.lock(), vec![(1, Ok(1))]);
        assert_eq!(queue.stats().processed, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_race_leaves_no_orphans() {
        let queue = Arc::new(PriorityRequestQueue::<u32, u32>::new(10, 2));

        for _ in 0..20 {
            let starter = Arc::clone(&queue);
            let start = tokio::spawn(async move { starter.start_workers(doubling_handler) });
            tokio::time::timeout(Duration::from_secs(3), queue.stop_workers()).await.expect("stop hung");
            start.await.unwrap();

            // Whatever the interleaving, a second stop leaves nothing behind
            tokio::time::timeout(Duration::from_secs(3), queue.stop_workers()).await.expect("stop hung");
            assert!(!queue.is_running());
            assert!(queue.workers.lock().is_empty());
        }
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let queue: PriorityRequestQueue<u32, u32> = PriorityRequestQueue::new(10, 1);

        queue.start_workers(doubling_handler);
        queue.stop_workers().await;

        queue.enqueue("again", 1, Priority::Normal, None);
        queue.start_workers(doubling_handler);
        wait_until(|| queue.stats().processed == 1).await;
        queue.stop_workers().await;
    }

    #[tokio::test]
    async fn test_clear_drops_pending() {
        let queue: PriorityRequestQueue<u32, ()> = PriorityRequestQueue::new(10, 1);
        for n in 0..4 {
            queue.enqueue(format!("req{n}"), n, Priority::Normal, None);
        }

        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let config = QueueConfig { name: "ingest".to_string(), max_size: 8, num_workers: 2, poll_timeout_ms: 250 };
        let queue: PriorityRequestQueue<u32, ()> = PriorityRequestQueue::from_config(&config).unwrap();
        queue.enqueue("one", 1, Priority::Normal, None);

        assert_eq!(queue.name(), "ingest");
        assert_eq!(queue.stats(), QueueStats { size: 1, max_size: 8, num_workers: 2, running: false, processed: 0, errors: 0 });
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = QueueConfig { num_workers: 0, ..QueueConfig::default() };
        assert!(PriorityRequestQueue::<u32, ()>::from_config(&config).is_err());
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        prop_oneof![Just(Priority::High), Just(Priority::Normal), Just(Priority::Low)]
    }

    proptest! {
        #[test]
        fn prop_dequeue_order_is_priority_then_fifo(priorities in prop::collection::vec(priority_strategy(), 1..50)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let queue: PriorityRequestQueue<usize, ()> = PriorityRequestQueue::new(priorities.len(), 1);

            for (index, priority) in priorities.iter().enumerate() {
                let request_id = format!("req{index}");
                prop_assert!(queue.enqueue(request_id, index, *priority, None));
            }

            let drained: Vec<(Priority, usize)> = runtime.block_on(async {
                let mut drained = Vec::with_capacity(priorities.len());
                while let Some(item) = queue.dequeue().await {
                    drained.push((item.priority, item.data));
                    if drained.len() == priorities.len() {
                        break;
                    }
                }
                drained
            });

            let mut expected: Vec<(Priority, usize)> = priorities.iter().copied().zip(0..).collect();
            expected.sort();
            prop_assert_eq!(drained, expected);
        }
    }
}
