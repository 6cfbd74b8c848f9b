//! The two worker hooks the pull loop consumes from its host process: a
//! bounded compute pool that runs job bodies, and the `running` flag the
//! supervisor flips to stop the worker.
//!
//! The system this generalizes drives everything off a single-threaded
//! event loop plus a separate OS thread pool reached via
//! `thread_pool.apply_async`. Job bodies here are already `async fn`s, so
//! the natural translation of "the compute pool" is a bounded set of
//! concurrently-spawned tokio tasks rather than a second OS thread pool —
//! the backlog counter in `pull::run_pull_loop` is what actually bounds
//! concurrency, holding at most `backlog` tasks in flight regardless of
//! which executor runs the futures.

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs task-executor futures to completion. `apply_async` must not block
/// the caller — spawn-and-return, matching a `thread_pool.apply_async(fn,
/// args)` style dispatch.
pub trait ComputePool: Send + Sync {
    fn apply_async(&self, fut: BoxFuture);
}

/// The default compute pool: hands every task straight to the tokio
/// runtime. Fine for I/O-bound job bodies; CPU-bound job bodies should use
/// a pool that internally dispatches onto `spawn_blocking` instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioComputePool;

impl ComputePool for TokioComputePool {
    fn apply_async(&self, fut: BoxFuture) {
        tokio::spawn(fut);
    }
}
