//! Errors specific to the remote key-value transport, convertible into the
//! core crate's [`taskkernel_core::TaskQueueError::BackendError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("key-value transport error: {0}")]
    Transport(String),

    #[error("task record for key '{0}' was not valid JSON: {1}")]
    Corrupt(String, String),

    #[error("blocking task join error: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for RemoteError {
    fn from(err: tokio::task::JoinError) -> Self {
        RemoteError::Join(err.to_string())
    }
}

impl From<RemoteError> for taskkernel_core::TaskQueueError {
    fn from(err: RemoteError) -> Self {
        taskkernel_core::TaskQueueError::BackendError { reason: err.to_string() }
    }
}
