use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::debug;
use tracing::info_span;
use tracing::warn;

use crate::config::TaskManagerConfig;
use crate::error::Result;
use crate::outcome::TaskOutcome;
use crate::outcome::TaskStatus;

type CompletionHook<T> = Box<dyn FnOnce(TaskOutcome<T>) + Send>;

struct TaskEntry {
    /// Distinguishes a re-submitted id from the task it replaced
    generation: u64,
    status: Arc<AtomicU8>,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TaskEntry {
    fn status(&self) -> TaskStatus {
        match TaskStatus::from_u8(self.status.load(Ordering::Acquire)) {
            // Aborted by the runtime before it could record an outcome
            TaskStatus::Running if self.handle.is_finished() => TaskStatus::Cancelled,
            status => status,
        }
    }
}

#[derive(Default)]
struct Registry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_generation: AtomicU64,
}

impl Registry {
    fn remove(&self, task_id: &str, generation: u64) {
        let mut tasks = self.tasks.lock();
        if tasks.get(task_id).is_some_and(|entry| entry.generation == generation) {
            tasks.remove(task_id);
            debug!(task_id, remaining = tasks.len(), "Task removed from registry");
        }
    }
}

/// Tracks a bounded set of named fire-and-forget tasks
///
/// A task leaves the registry as soon as it finishes, however it finishes,
/// or as soon as it is cancelled. Because of that, `get_status` answers
/// `None` both for ids that were never submitted and for ids that are done.
pub struct AsyncTaskManager {
    registry: Arc<Registry>,
    max_tasks: usize,
}

impl AsyncTaskManager {
    pub fn new(max_tasks: usize) -> Self {
        assert!(max_tasks > 0, "max_tasks must be greater than 0");
        Self { registry: Arc::new(Registry::default()), max_tasks }
    }

    pub fn from_config(config: &TaskManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.max_tasks))
    }

    /// Schedule `work` under `task_id`
    ///
    /// Returns `false` if the registry is full or the id is already tracked.
    /// Must be called from within a tokio runtime.
    pub fn submit<F, T, E>(&self, task_id: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        self.spawn_tracked(task_id.into(), work, None)
    }

    /// Like [`submit`](Self::submit), reporting the outcome to `on_complete`
    ///
    /// The hook runs exactly once, before the task leaves the registry, with
    /// `Completed`, `Failed` or `Cancelled`.
    pub fn submit_with_callback<F, T, E, C>(&self, task_id: impl Into<String>, work: F, on_complete: C) -> bool
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.spawn_tracked(task_id.into(), work, Some(Box::new(on_complete)))
    }

    fn spawn_tracked<F, T, E>(&self, task_id: String, work: F, on_complete: Option<CompletionHook<T>>) -> bool
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        // Held across the spawn so the task cannot try to remove itself first
        let mut tasks = self.registry.tasks.lock();

        if tasks.len() >= self.max_tasks {
            warn!(task_id = %task_id, max_tasks = self.max_tasks, "Task registry full, rejecting task");
            return false;
        }
        if tasks.contains_key(&task_id) {
            warn!(task_id = %task_id, "Task id already registered, rejecting task");
            return false;
        }

        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let status = Arc::new(AtomicU8::new(TaskStatus::Running as u8));
        let (cancel, cancelled) = oneshot::channel();

        let tracked = run_tracked(Arc::clone(&self.registry), task_id.clone(), generation, Arc::clone(&status), work, cancelled, on_complete);
        let handle = tokio::spawn(tracked.instrument(info_span!("managed_task", task_id = %task_id)));

        debug!(task_id = %task_id, active = tasks.len() + 1, "Task submitted");
        tasks.insert(task_id, TaskEntry { generation, status, cancel, handle });
        true
    }

    /// Ask a task to stop and forget it straight away
    ///
    /// The work is dropped at its next suspension point; this does not wait
    /// for that to happen.
    pub fn cancel(&self, task_id: &str) -> bool {
        let Some(entry) = self.registry.tasks.lock().remove(task_id) else {
            return false;
        };

        // The task may already be finishing, in which case nobody is listening
        let _ = entry.cancel.send(());
        debug!(task_id, "Task cancelled");
        true
    }

    /// Cancel every tracked task, returning how many there were
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, TaskEntry)> = self.registry.tasks.lock().drain().collect();
        let count = drained.len();

        for (task_id, entry) in drained {
            let _ = entry.cancel.send(());
            debug!(task_id = %task_id, "Task cancelled");
        }
        count
    }

    pub fn get_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.registry.tasks.lock().get(task_id).map(TaskEntry::status)
    }

    /// Tasks currently tracked
    pub fn active_count(&self) -> usize {
        self.registry.tasks.lock().len()
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }
}

impl Default for AsyncTaskManager {
    fn default() -> Self {
        Self::new(TaskManagerConfig::default().max_tasks)
    }
}

impl Drop for AsyncTaskManager {
    fn drop(&mut self) {
        // Running tasks hold the registry, so its senders would outlive the manager
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Task manager dropped, outstanding tasks cancelled");
        }
    }
}

async fn run_tracked<F, T, E>(
    registry: Arc<Registry>,
    task_id: String,
    generation: u64,
    status: Arc<AtomicU8>,
    work: F,
    cancelled: oneshot::Receiver<()>,
    on_complete: Option<CompletionHook<T>>,
) where
    F: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    // A dropped sender counts as a cancel too
    let outcome = tokio::select! {
        biased;
        _ = cancelled => TaskOutcome::Cancelled,
        result = AssertUnwindSafe(work).catch_unwind() => match result {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(err)) => TaskOutcome::Failed(err.to_string()),
            Err(panic) => TaskOutcome::Failed(panic_message(panic.as_ref())),
        },
    };

    status.store(outcome.status() as u8, Ordering::Release);
    match &outcome {
        TaskOutcome::Failed(err) => warn!(error = %err, "Task failed"),
        other => debug!(status = %other.status(), "Task finished"),
    }

    if let Some(on_complete) = on_complete
        && std::panic::catch_unwind(AssertUnwindSafe(|| on_complete(outcome))).is_err()
    {
        warn!("Task completion hook panicked");
    }

    registry.remove(&task_id, generation);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
