use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cc_queue::HandlerError;
use cc_queue::Priority;
use cc_queue::PriorityRequestQueue;
use cc_queue::QueueError;
use cc_queue::QueueStats;
use cc_queue::callback;
use cc_ratelimit::CombinedLimiter;
use cc_ratelimit::RateLimitError;
use cc_ratelimit::RateLimitInfo;
use cc_tasks::AsyncTaskManager;
use cc_tasks::TaskError;
use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing::warn;

use crate::config_loader::DispatcherConfigFile;

pub type Result<T> = std::result::Result<T, DispatchError>;

const STATS_TASK_ID: &str = "stats-reporter";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Tasks(#[from] TaskError),

    #[error("Job {0} failed")]
    JobFailed(String),
}

/// Simulated upstream call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub priority: Priority,
    pub duration_ms: u64,
    /// Fail instead of producing a report
    pub fail: bool,
}

impl Job {
    pub fn new(id: impl Into<String>, priority: Priority, duration_ms: u64) -> Self {
        Self { id: id.into(), priority, duration_ms, fail: false }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// The `index`-th job of the startup batch
    ///
    /// Priorities rotate High, Normal, Low. Every `failure_every`-th job fails.
    pub fn demo(index: usize, config: &DispatcherConfigFile) -> Self {
        let priority = match index % 3 {
            0 => Priority::High,
            1 => Priority::Normal,
            _ => Priority::Low,
        };
        let job = Self::new(format!("job-{index:04}"), priority, config.job_duration_ms);

        if config.failure_every > 0 && (index + 1) % config.failure_every == 0 { job.failing() } else { job }
    }
}

/// What a successful job hands to its callback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub id: String,
    pub priority: Priority,
    pub duration_ms: u64,
    /// Rate window state when the job was admitted
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatcherStats {
    pub queue: QueueStats,
    pub finished: u64,
    pub active_slots: usize,
    pub rate_remaining: i64,
    pub background_tasks: usize,
}

async fn execute(job: Job, rate_limit: RateLimitInfo) -> Result<JobReport> {
    tokio::time::sleep(Duration::from_millis(job.duration_ms)).await;

    if job.fail {
        return Err(DispatchError::JobFailed(job.id));
    }

    Ok(JobReport { id: job.id, priority: job.priority, duration_ms: job.duration_ms, rate_limit })
}

/// Priority queue whose workers run every job through a combined limiter
///
/// Background chores, such as the stats reporter, live in the task manager so
/// shutdown can cancel them in one call.
pub struct Dispatcher {
    limiter: Arc<CombinedLimiter>,
    queue: Arc<PriorityRequestQueue<Job, JobReport>>,
    tasks: AsyncTaskManager,
    /// Jobs whose callback has run
    finished: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfigFile) -> Result<Self> {
        let limiter = CombinedLimiter::from_config(&config.rate_limit, &config.concurrency)?;
        let queue = PriorityRequestQueue::from_config(&config.queue)?;
        let tasks = AsyncTaskManager::from_config(&config.tasks)?;

        Ok(Self { limiter: Arc::new(limiter), queue: Arc::new(queue), tasks, finished: Arc::new(AtomicU64::new(0)) })
    }

    /// Start the worker pool
    pub fn start(&self) {
        let limiter = Arc::clone(&self.limiter);

        self.queue.start_workers(move |job: Job| {
            let limiter = Arc::clone(&limiter);
            async move { limiter.run(|info| execute(job, info)).await }
        });
    }

    /// Queue a job; `false` if the queue is full
    pub fn submit(&self, job: Job) -> bool {
        let request_id = job.id.clone();
        let priority = job.priority;
        let finished = Arc::clone(&self.finished);

        let on_done = callback(move |result: std::result::Result<JobReport, HandlerError>| async move {
            match result {
                Ok(report) => match serde_json::to_string(&report) {
                    Ok(json) => info!(report = %json, "Job completed"),
                    Err(err) => warn!(id = %report.id, error = %err, "Failed to serialize job report"),
                },
                Err(err) => {
                    let payload = serde_json::to_string(&err).unwrap_or_else(|_| err.to_string());
                    warn!(payload = %payload, "Job failed");
                }
            }
            finished.fetch_add(1, Ordering::Relaxed);
        });

        self.queue.enqueue(request_id, job, priority, Some(on_done))
    }

    /// Log a stats line every `interval` until the workers stop
    ///
    /// Returns `false` if a reporter is already running.
    pub fn start_stats_reporter(&self, interval: Duration) -> bool {
        let limiter = Arc::clone(&self.limiter);
        let queue = Arc::clone(&self.queue);
        let finished = Arc::clone(&self.finished);

        self.tasks.submit(STATS_TASK_ID, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let stats = queue.stats();
                let window = limiter.rate_limiter().check().await;
                info!(
                    queue = %queue.name(),
                    pending = stats.size,
                    processed = stats.processed,
                    errors = stats.errors,
                    finished = finished.load(Ordering::Relaxed),
                    active_slots = limiter.concurrency_limiter().active_count(),
                    rate_remaining = window.remaining,
                    "Dispatcher stats"
                );

                if !stats.running {
                    break;
                }
            }

            Ok::<(), Infallible>(())
        })
    }

    /// True once `total` jobs have been through their callback
    pub fn is_drained(&self, total: u64) -> bool {
        self.finished.load(Ordering::Relaxed) >= total
    }

    pub async fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queue: self.queue.stats(),
            finished: self.finished.load(Ordering::Relaxed),
            active_slots: self.limiter.concurrency_limiter().active_count(),
            rate_remaining: self.limiter.rate_limiter().check().await.remaining,
            background_tasks: self.tasks.active_count(),
        }
    }

    pub fn queue(&self) -> &PriorityRequestQueue<Job, JobReport> {
        &self.queue
    }

    pub fn tasks(&self) -> &AsyncTaskManager {
        &self.tasks
    }

    /// Cancel background tasks and wait for the workers to finish
    pub async fn shutdown(&self) {
        let cancelled = self.tasks.cancel_all();
        self.queue.stop_workers().await;

        let abandoned = self.queue.size();
        if abandoned > 0 {
            warn!(abandoned, "Jobs left in the queue at shutdown");
        }
        info!(cancelled, "Dispatcher stopped");
    }
}
