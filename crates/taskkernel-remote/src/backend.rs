//! [`RemoteBackend`]: the second, interchangeable `TaskBackend`
//! implementation against an abstract key-value service.
//!
//! The store and dedup/dispatch logic are identical in shape to
//! `taskkernel-memory`'s; only the durability layer (bytes over a `KvClient`
//! instead of a `DashMap`) differs, which is exactly the seam drawn around
//! the concrete transport to remote stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use taskkernel_core::{
    is_admissible_transition, CallbackTable, GetTaskOptions, JobRegistry, Result, Schedule,
    SchedulerEntry, SchedulerTable, Task, TaskBackend, TaskFilter, TaskPatch, TaskQueueConfig,
    TaskStatus, WhenDone,
};

use crate::error::RemoteError;
use crate::kv::KvClient;
use crate::queue::RemoteQueue;

const TASK_KEY_PREFIX: &str = "task:";

/// How often `get_task(when_done: true)` re-polls the store while waiting
/// for a remote writer (possibly another process) to mark a task terminal.
const WHEN_DONE_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn task_key(id: &str) -> String {
    format!("{TASK_KEY_PREFIX}{id}")
}

pub struct RemoteBackend {
    kv: Arc<dyn KvClient>,
    queue: Arc<dyn RemoteQueue>,
    registry: JobRegistry,
    callbacks: CallbackTable,
    entries: SchedulerTable,
    config: TaskQueueConfig,
}

impl RemoteBackend {
    pub fn new(
        kv: Arc<dyn KvClient>,
        queue: Arc<dyn RemoteQueue>,
        registry: JobRegistry,
        config: TaskQueueConfig,
    ) -> Arc<Self> {
        let entries = SchedulerTable::new();
        if config.schedule_periodic {
            let now = Utc::now();
            for job in registry.filter_periodic() {
                let cadence = job.run_every.unwrap_or(Duration::from_secs(60));
                let schedule = match job.anchor {
                    Some(anchor) => Schedule::anchored_every(cadence, anchor),
                    None => Schedule::every(cadence),
                };
                entries.insert(SchedulerEntry::new(job.name.clone(), schedule, now));
            }
        }
        Arc::new(Self { kv, queue, registry, callbacks: CallbackTable::new(), entries, config })
    }

    async fn load(&self, id: &str) -> Result<Option<Task>> {
        let raw = self.kv.get(&task_key(id)).await?;
        let Some(bytes) = raw else { return Ok(None) };
        let task: Task = serde_json::from_slice(&bytes).map_err(|e| {
            RemoteError::Corrupt(id.to_string(), e.to_string())
        })?;
        Ok(Some(task))
    }

    async fn store(&self, task: &Task) -> Result<()> {
        let bytes = serde_json::to_vec(task).map_err(|e| RemoteError::Corrupt(task.id.clone(), e.to_string()))?;
        self.kv.set(&task_key(&task.id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskBackend for RemoteBackend {
    async fn put_task(&self, id: &str) -> Result<()> {
        self.queue.push(id).await?;
        Ok(())
    }

    async fn get_task(&self, opts: GetTaskOptions) -> Result<Option<Task>> {
        let Some(id) = opts.id else {
            let Some(id) = self.queue.pop(opts.timeout).await? else {
                return Ok(None);
            };
            return self.load(&id).await;
        };

        let Some(current) = self.load(&id).await? else {
            return Ok(None);
        };
        if !opts.when_done {
            return Ok(Some(current));
        }
        match self.callbacks.when_done(&current) {
            WhenDone::Ready(task) => Ok(Some(task)),
            WhenDone::Pending(rx) => {
                // Another local waiter (or this backend's own executor) may
                // fulfil the oneshot; but a remote writer in a different
                // process has no way to reach our local callback table, so
                // we race the channel against a poll loop over the store.
                tokio::select! {
                    result = rx => Ok(result.ok()),
                    polled = self.poll_until_done(&id, opts.timeout) => polled,
                }
            }
        }
    }

    async fn get_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let keys = self.kv.list_keys_with_prefix(TASK_KEY_PREFIX).await?;
        let mut out = Vec::new();
        for key in keys {
            let id = key.trim_start_matches(TASK_KEY_PREFIX);
            if let Some(task) = self.load(id).await? {
                if filter.matches(&task) {
                    out.push(task);
                }
            }
        }
        Ok(out)
    }

    async fn save_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let existing = self.load(id).await?;
        let task = match existing {
            None => patch.into_new_task(id),
            Some(current) => {
                if let Some(target) = patch.status {
                    if !is_admissible_transition(current.status, target) {
                        tracing::warn!(
                            task_id = %id,
                            from = ?current.status,
                            to = ?target,
                            "rejecting inadmissible status transition"
                        );
                        let mut rejected = current.clone();
                        rejected.status = TaskStatus::Unknown;
                        if rejected.time_ended.is_none() {
                            rejected.time_ended = Some(Utc::now());
                        }
                        self.store(&rejected).await?;
                        self.callbacks.on_status_change(&rejected);
                        return Ok(rejected);
                    }
                }
                patch.apply(&current)
            }
        };
        self.store(&task).await?;
        self.callbacks.on_status_change(&task);
        Ok(task)
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.kv.delete(&task_key(id)).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn num_tasks(&self) -> Result<usize> {
        Ok(self.kv.list_keys_with_prefix(TASK_KEY_PREFIX).await?.len())
    }

    fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    fn entries(&self) -> &SchedulerTable {
        &self.entries
    }

    fn config(&self) -> &TaskQueueConfig {
        &self.config
    }
}

impl RemoteBackend {
    async fn poll_until_done(&self, id: &str, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.load(id).await? {
                if task.done() {
                    return Ok(Some(task));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return self.load(id).await;
            }
            tokio::time::sleep(WHEN_DONE_POLL_INTERVAL.min(timeout)).await;
        }
    }
}
