//! `TaskBackend` against an abstract remote key-value service.
//!
//! This crate never talks to a concrete wire protocol — the concrete
//! transport to remote stores is an external collaborator.
//! [`kv::KvClient`] and [`queue::RemoteQueue`] are the two seams the core
//! consumes; any transport implementing them (a managed KV service, Redis,
//! etcd, ...) plugs into [`backend::RemoteBackend`] unchanged.

pub mod backend;
pub mod error;
pub mod kv;
pub mod queue;

pub use backend::RemoteBackend;
pub use error::{RemoteError, Result};
pub use kv::{BlockingKvAdapter, BlockingKvStore, KvClient};
pub use queue::RemoteQueue;
