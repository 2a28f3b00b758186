use std::fmt;

use serde::Serialize;

/// How a managed task ended, handed to its completion hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The work returned an error or panicked
    Failed(String),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Live state of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TaskStatus {
    Running = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
}

impl TaskStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => TaskStatus::Completed,
            2 => TaskStatus::Failed,
            3 => TaskStatus::Cancelled,
            _ => TaskStatus::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != TaskStatus::Running
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
