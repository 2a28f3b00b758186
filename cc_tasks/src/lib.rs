//! # cc_tasks
//!
//! Bounded registry of named background tasks with cooperative cancellation.

pub mod config;
pub mod error;
pub mod manager;
pub mod outcome;

pub use config::TaskManagerConfig;
pub use error::Result;
pub use error::TaskError;
pub use manager::AsyncTaskManager;
pub use outcome::TaskOutcome;
pub use outcome::TaskStatus;
