//! The abstract dispatch queue a remote backend is built against — the
//! out-of-scope concrete transport to remote stores, treated here as an
//! abstract FIFO-ish queue.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait RemoteQueue: Send + Sync {
    /// Append `id` to the queue. At-least-once delivery to some puller.
    async fn push(&self, id: &str) -> Result<()>;

    /// Pop the next id, waiting up to `timeout` if the queue is empty.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;
}
