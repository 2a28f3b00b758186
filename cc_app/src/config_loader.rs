use std::path::Path;

use cc_queue::QueueConfig;
use cc_ratelimit::ConcurrencyConfig;
use cc_ratelimit::RateLimitConfig;
use cc_tasks::TaskManagerConfig;
use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

/// Everything the dispatcher binary reads from disk
///
/// Any key can be overridden from the environment with a `CC_` prefix and
/// `__` between sections, e.g. `CC_QUEUE__NUM_WORKERS=8`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfigFile {
    pub log_dir: String,
    /// Demo jobs enqueued at startup
    pub jobs: usize,
    pub job_duration_ms: u64,
    /// Every n-th demo job fails on purpose; 0 disables
    pub failure_every: usize,
    pub stats_interval_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub concurrency: ConcurrencyConfig,
    pub queue: QueueConfig,
    pub tasks: TaskManagerConfig,
}

impl Default for DispatcherConfigFile {
    fn default() -> Self {
        Self {
            log_dir: "./logs".to_string(),
            jobs: 20,
            job_duration_ms: 200,
            failure_every: 7,
            stats_interval_ms: 1000,
            rate_limit: RateLimitConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            queue: QueueConfig::default(),
            tasks: TaskManagerConfig::default(),
        }
    }
}

pub fn load_dispatcher_config<P: AsRef<Path>>(path: P) -> Result<DispatcherConfigFile, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()))
        .add_source(Environment::with_prefix("CC").prefix_separator("_").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Load dispatcher config with fallback to default
pub fn load_dispatcher_config_or_default<P: AsRef<Path>>(path: P) -> DispatcherConfigFile {
    let path = path.as_ref();
    match load_dispatcher_config(path) {
        Ok(config) => {
            tracing::info!("Loaded dispatcher config from {}", path.display());
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load dispatcher config from {}: {}. Using defaults.", path.display(), err);
            DispatcherConfigFile::default()
        }
    }
}
