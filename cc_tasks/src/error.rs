use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    #[error("Invalid task manager configuration: {0}")]
    InvalidConfig(&'static str),
}
