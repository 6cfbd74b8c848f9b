//! The worker's pull loop: cooperatively poll the backend for ready tasks,
//! respect the backlog, and hand each task to the compute pool without
//! blocking other work on the event loop.
//!
//! Grounded on `openintent-kernel::scheduler::Scheduler::worker_loop`'s
//! notify-driven drain pattern, generalized with an explicit backlog
//! counter that is only ever touched from this function's own task —
//! `concurrent_requests` is updated only on the event-loop side, with the
//! compute side signalling completion over an `mpsc` channel instead of a
//! shared atomic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskkernel_core::{GetTaskOptions, Task, TaskBackend};
use tokio::sync::mpsc;

use crate::executor::execute_task;
use crate::hooks::ComputePool;

#[derive(Debug, Clone)]
pub struct PullLoopConfig {
    pub worker_name: String,
    /// Poll timeout passed to `get_task` and the interval the loop waits
    /// before re-checking the backlog or the absence of a compute pool.
    pub poll_timeout: Duration,
}

impl Default for PullLoopConfig {
    fn default() -> Self {
        Self { worker_name: "worker".to_string(), poll_timeout: Duration::from_millis(200) }
    }
}

/// Drive the pull loop until `running` is cleared. Intended to be spawned
/// onto its own task; awaiting it directly blocks until shutdown.
pub async fn run_pull_loop(
    backend: Arc<dyn TaskBackend>,
    compute: Option<Arc<dyn ComputePool>>,
    running: Arc<AtomicBool>,
    config: PullLoopConfig,
) {
    let backlog = backend.config().backlog;
    let mut concurrent_requests: usize = 0;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    while running.load(Ordering::Acquire) {
        while done_rx.try_recv().is_ok() {
            concurrent_requests = concurrent_requests.saturating_sub(1);
        }

        if concurrent_requests >= backlog {
            tracing::trace!(worker = %config.worker_name, backlog, concurrent_requests, "backlog full, waiting for a slot");
            tokio::select! {
                got = done_rx.recv() => {
                    if got.is_some() {
                        concurrent_requests = concurrent_requests.saturating_sub(1);
                    }
                }
                _ = tokio::time::sleep(config.poll_timeout) => {}
            }
            continue;
        }

        let Some(pool) = compute.as_ref() else {
            tracing::warn!(worker = %config.worker_name, "no compute pool attached; yielding without consuming");
            tokio::time::sleep(config.poll_timeout).await;
            continue;
        };

        match backend.get_task(GetTaskOptions::next(config.poll_timeout)).await {
            Ok(Some(task)) => {
                dispatch(
                    Arc::clone(&backend),
                    pool.as_ref(),
                    &config.worker_name,
                    task,
                    &mut concurrent_requests,
                    done_tx.clone(),
                );
            }
            Ok(None) => {
                // Nothing ready; the loop re-arms on its next iteration
                // without having consumed anything.
            }
            Err(e) => {
                tracing::warn!(worker = %config.worker_name, error = %e, "transient backend error polling for work");
            }
        }
    }

    tracing::info!(worker = %config.worker_name, "pull loop stopped");
}

fn dispatch(
    backend: Arc<dyn TaskBackend>,
    pool: &dyn ComputePool,
    worker_name: &str,
    task: Task,
    concurrent_requests: &mut usize,
    done_tx: mpsc::UnboundedSender<()>,
) {
    *concurrent_requests += 1;
    let worker_name = worker_name.to_string();
    tracing::debug!(worker = %worker_name, task_id = %task.id, job = %task.name, "dispatching task to compute pool");
    pool.apply_async(Box::pin(async move {
        execute_task(backend, worker_name, task).await;
        let _ = done_tx.send(());
    }));
}
