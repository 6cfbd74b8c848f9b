//! The periodic scheduler's tick driver: repeatedly calls `TaskBackend::tick`
//! and sleeps for however long the backend says is left until the next
//! entry is due, rather than polling on a fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskkernel_core::TaskBackend;

/// Fallback sleep when `tick` reports no entries at all (nothing to wait
/// on) or fails transiently; avoids a busy loop without needing a due time.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct SchedulerDriver {
    backend: Arc<dyn TaskBackend>,
    running: Arc<AtomicBool>,
}

impl SchedulerDriver {
    pub fn new(backend: Arc<dyn TaskBackend>, running: Arc<AtomicBool>) -> Self {
        Self { backend, running }
    }

    /// Run until `running` is cleared. A no-op if the backend was
    /// constructed with `schedule_periodic = false`.
    pub async fn run(&self) {
        if !self.backend.config().schedule_periodic {
            return;
        }
        while self.running.load(Ordering::Acquire) {
            let now = Utc::now();
            let sleep_for = match self.backend.tick(now).await {
                Ok(Some(remaining)) => remaining,
                Ok(None) => IDLE_POLL_INTERVAL,
                Err(e) => {
                    tracing::error!(error = %e, "periodic scheduler tick failed");
                    IDLE_POLL_INTERVAL
                }
            };
            tokio::time::sleep(sleep_for.max(Duration::from_millis(1))).await;
        }
        tracing::info!("scheduler driver stopped");
    }
}
