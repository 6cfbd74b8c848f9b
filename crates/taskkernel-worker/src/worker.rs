//! Ties the pull loop and the periodic scheduler driver to one backend and
//! one `running` flag, giving the process supervisor a single handle to
//! start and stop a worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskkernel_core::TaskBackend;
use tokio::task::JoinHandle;

use crate::hooks::ComputePool;
use crate::pull::{self, PullLoopConfig};
use crate::scheduler::SchedulerDriver;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub poll_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { name: "worker-0".to_string(), poll_timeout: Duration::from_millis(200) }
    }
}

/// A worker: one backend, one compute pool, one pull loop, and — when the
/// backend was set up with periodic scheduling — one scheduler driver.
pub struct Worker {
    backend: Arc<dyn TaskBackend>,
    compute: Option<Arc<dyn ComputePool>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(backend: Arc<dyn TaskBackend>, compute: Option<Arc<dyn ComputePool>>, config: WorkerConfig) -> Self {
        Self { backend, compute, config }
    }

    /// Spawn the pull loop (and the scheduler driver, if enabled) as
    /// background tasks and return a handle to stop them.
    pub fn start(&self) -> WorkerHandles {
        let running = Arc::new(AtomicBool::new(true));

        let pull_task = tokio::spawn(pull::run_pull_loop(
            Arc::clone(&self.backend),
            self.compute.clone(),
            Arc::clone(&running),
            PullLoopConfig { worker_name: self.config.name.clone(), poll_timeout: self.config.poll_timeout },
        ));

        let scheduler_task = if self.backend.config().schedule_periodic {
            let driver = SchedulerDriver::new(Arc::clone(&self.backend), Arc::clone(&running));
            Some(tokio::spawn(async move { driver.run().await }))
        } else {
            None
        };

        WorkerHandles { running, pull_task, scheduler_task }
    }
}

/// Handle returned by [`Worker::start`]. Dropping it leaves the background
/// tasks running; call [`WorkerHandles::cancel`] to stop them.
pub struct WorkerHandles {
    running: Arc<AtomicBool>,
    pull_task: JoinHandle<()>,
    scheduler_task: Option<JoinHandle<()>>,
}

impl WorkerHandles {
    /// Stop polling for new work. In-flight task bodies already dispatched
    /// to the compute pool are not cancelled — they run to completion, with
    /// their result discarded downstream if the task already reached a
    /// terminal status by the time they finish.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// `cancel`, then wait for both background tasks to actually exit.
    pub async fn shutdown(self) {
        self.cancel();
        let _ = self.pull_task.await;
        if let Some(scheduler_task) = self.scheduler_task {
            let _ = scheduler_task.await;
        }
    }
}
