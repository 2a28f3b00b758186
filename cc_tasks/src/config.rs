use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::TaskError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Ceiling on simultaneously tracked tasks
    pub max_tasks: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self { max_tasks: 100 }
    }
}

impl TaskManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tasks == 0 {
            return Err(TaskError::InvalidConfig("max_tasks must be greater than 0"));
        }
        Ok(())
    }
}
