//! Error taxonomy for the task queue kernel.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, TaskQueueError>;

/// Failure modes a [`crate::backend::TaskBackend`] or job body can surface.
#[derive(Debug, Error)]
pub enum TaskQueueError {
    /// `create_task`/`run_job` referenced a job name absent from the registry.
    #[error("job '{name}' is not registered")]
    TaskNotAvailable { name: String },

    /// A job body did not return within its configured timeout.
    #[error("task {task_id} timed out")]
    TaskTimeout { task_id: String },

    /// The job body returned an error. Carries a stringified message rather
    /// than the original error type, matching the traceback-as-string
    /// result convention described for failed tasks.
    #[error("task {task_id} failed: {message}")]
    JobFailed { task_id: String, message: String },

    /// A backend's storage primitive failed (I/O, serialization, transport).
    #[error("backend error: {reason}")]
    BackendError { reason: String },

    /// Configuration failed validation at construction time.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl From<tokio::task::JoinError> for TaskQueueError {
    fn from(err: tokio::task::JoinError) -> Self {
        TaskQueueError::BackendError {
            reason: format!("join error: {err}"),
        }
    }
}
