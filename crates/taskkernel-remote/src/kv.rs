//! The abstract key-value store a remote backend is built against.
//!
//! The concrete transport to remote stores is out of scope — this crate
//! only specifies the shape the core consumes from it:
//! byte-blob get/set/delete plus a prefix scan, so [`RemoteBackend`] can
//! store the JSON form of a [`taskkernel_core::Task`] without caring whether
//! the bytes end up in Redis, etcd, a managed KV service, or a test double.

use async_trait::async_trait;

use crate::error::Result;

/// Async key-value contract a remote backend is built against.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// All keys currently stored under `prefix`. Best-effort, unordered —
    /// callers must not rely on iteration order.
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Blocking counterpart to [`KvClient`], for transports whose native client
/// is synchronous (the common case for C bindings and most embedded KV
/// engines). Grounded on `openintent-store::db::Database`, which wraps a
/// blocking `rusqlite::Connection` behind `tokio::task::spawn_blocking` so
/// the async event loop is never stalled by disk I/O.
pub trait BlockingKvStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, String>;
    fn set(&self, key: &str, value: Vec<u8>) -> std::result::Result<(), String>;
    fn delete(&self, key: &str) -> std::result::Result<bool, String>;
    fn list_keys_with_prefix(&self, prefix: &str) -> std::result::Result<Vec<String>, String>;
}

/// Adapts a synchronous [`BlockingKvStore`] into the async [`KvClient`]
/// contract by dispatching every call onto the blocking thread pool, the
/// same pattern `Database::execute` uses for `rusqlite`.
pub struct BlockingKvAdapter<S> {
    store: std::sync::Arc<S>,
}

impl<S: BlockingKvStore> BlockingKvAdapter<S> {
    pub fn new(store: S) -> Self {
        Self { store: std::sync::Arc::new(store) }
    }
}

#[async_trait]
impl<S: BlockingKvStore> KvClient for BlockingKvAdapter<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = std::sync::Arc::clone(&self.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await?
            .map_err(crate::error::RemoteError::Transport)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let store = std::sync::Arc::clone(&self.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.set(&key, value))
            .await?
            .map_err(crate::error::RemoteError::Transport)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let store = std::sync::Arc::clone(&self.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.delete(&key))
            .await?
            .map_err(crate::error::RemoteError::Transport)
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let store = std::sync::Arc::clone(&self.store);
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || store.list_keys_with_prefix(&prefix))
            .await?
            .map_err(crate::error::RemoteError::Transport)
    }
}
