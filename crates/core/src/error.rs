//! Task error model.

use thiserror::Error;

/// Result type used by task drivers.
pub type TaskResult<T> = Result<T, TaskError>;

/// Failures of the task machinery itself.
///
/// Budget exhaustion is not an error; drivers report it as `Ok(false)`.
/// Errors returned by the caller's operation are never wrapped in this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// `run` was called on a task that has already run.
    #[error("task `{0}` has already been run")]
    AlreadyRun(String),

    /// The scheduler refused to accept the task's iterations.
    #[error("scheduler rejected task `{task}`: {reason}")]
    Rejected { task: String, reason: String },

    /// The scheduler dropped the task before it reached a terminal state.
    #[error("scheduler stopped before task `{0}` finished")]
    SchedulerStopped(String),
}

impl TaskError {
    pub fn already_run(task: impl Into<String>) -> Self {
        Self::AlreadyRun(task.into())
    }

    pub fn rejected(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            task: task.into(),
            reason: reason.into(),
        }
    }

    pub fn scheduler_stopped(task: impl Into<String>) -> Self {
        Self::SchedulerStopped(task.into())
    }
}
