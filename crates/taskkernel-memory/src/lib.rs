//! The in-memory `TaskBackend`: the default backend used by single-process
//! deployments and by every test in the workspace.
//!
//! Grounded on `openintent-kernel::scheduler::Scheduler` — a `DashMap`-backed
//! store paired with a `crossbeam::queue::SegQueue` fed by a `tokio::sync::Notify`
//! so the pull side never busy-spins waiting for work.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use tokio::sync::Notify;

use taskkernel_core::{
    CallbackTable, GetTaskOptions, JobRegistry, Result, Schedule, SchedulerEntry, SchedulerTable,
    Task, TaskBackend, TaskFilter, TaskPatch, TaskQueueConfig, TaskQueueError,
};

/// `TaskBackend` implementation that keeps every task and the dispatch
/// queue in process memory. Nothing here survives a restart; that tradeoff
/// is what makes it fast enough to use as the default test backend.
pub struct MemoryBackend {
    store: DashMap<String, Task>,
    queue: SegQueue<String>,
    notify: Notify,
    registry: JobRegistry,
    callbacks: CallbackTable,
    entries: SchedulerTable,
    config: TaskQueueConfig,
}

impl MemoryBackend {
    /// Build a backend around `registry` and `config`. When
    /// `config.schedule_periodic` is set, seeds one [`SchedulerEntry`] per
    /// periodic job found in `registry` at this instant.
    pub fn new(registry: JobRegistry, config: TaskQueueConfig) -> Arc<Self> {
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
        Arc::new(Self {
            store: DashMap::new(),
            queue: SegQueue::new(),
            notify: Notify::new(),
            registry,
            callbacks: CallbackTable::new(),
            entries,
            config,
        })
    }

    fn pop_ready(&self) -> Option<Task> {
        while let Some(id) = self.queue.pop() {
            if let Some(task) = self.store.get(&id).map(|e| e.value().clone()) {
                return Some(task);
            }
            tracing::trace!(task_id = %id, "dropping dequeued id with no backing record");
        }
        None
    }
}

#[async_trait]
impl TaskBackend for MemoryBackend {
    async fn put_task(&self, id: &str) -> Result<()> {
        self.queue.push(id.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn get_task(&self, opts: GetTaskOptions) -> Result<Option<Task>> {
        let Some(id) = opts.id else {
            if let Some(task) = self.pop_ready() {
                return Ok(Some(task));
            }
            let wait = self.notify.notified();
            let _ = tokio::time::timeout(opts.timeout, wait).await;
            return Ok(self.pop_ready());
        };

        let current = self.store.get(&id).map(|e| e.value().clone());
        let Some(current) = current else {
            return Ok(None);
        };
        if !opts.when_done {
            return Ok(Some(current));
        }
        match self.callbacks.when_done(&current) {
            taskkernel_core::WhenDone::Ready(task) => Ok(Some(task)),
            taskkernel_core::WhenDone::Pending(rx) => {
                match tokio::time::timeout(opts.timeout, rx).await {
                    Ok(Ok(task)) => Ok(Some(task)),
                    // Channel dropped (e.g. a second waiter replaced ours) or
                    // the timeout elapsed: fall back to the latest snapshot.
                    _ => Ok(self.store.get(&id).map(|e| e.value().clone())),
                }
            }
        }
    }

    async fn get_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        Ok(self
            .store
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| filter.matches(t))
            .collect())
    }

    async fn save_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let existing = self.store.get(id).map(|e| e.value().clone());
        let task = match existing {
            None => patch.into_new_task(id),
            Some(current) => {
                if let Some(target) = patch.status {
                    if !taskkernel_core::is_admissible_transition(current.status, target) {
                        tracing::warn!(
                            task_id = %id,
                            from = ?current.status,
                            to = ?target,
                            "rejecting inadmissible status transition"
                        );
                        let mut rejected = current.clone();
                        rejected.status = taskkernel_core::TaskStatus::Unknown;
                        if rejected.time_ended.is_none() {
                            rejected.time_ended = Some(Utc::now());
                        }
                        self.store.insert(id.to_string(), rejected.clone());
                        self.callbacks.on_status_change(&rejected);
                        return Ok(rejected);
                    }
                }
                patch.apply(&current)
            }
        };
        self.store.insert(id.to_string(), task.clone());
        self.callbacks.on_status_change(&task);
        Ok(task)
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.store.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn num_tasks(&self) -> Result<usize> {
        Ok(self.store.len())
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

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("tasks", &self.store.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Convenience conversion so a bare `TaskNotAvailable` lookup failure from
/// outside `create_task` (e.g. a caller checking a job exists before
/// enqueuing) reads naturally.
pub fn job_not_available(name: impl Into<String>) -> TaskQueueError {
    TaskQueueError::TaskNotAvailable { name: name.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use taskkernel_core::{JobDescriptor, JobFuture, TaskStatus};

    fn echo_job(_c: taskkernel_core::Consumer, args: Vec<Value>, _k: Map<String, Value>) -> JobFuture {
        Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
    }

    fn backend_with_echo() -> Arc<MemoryBackend> {
        let registry = JobRegistry::new();
        registry.register(JobDescriptor::regular("echo", echo_job));
        MemoryBackend::new(registry, TaskQueueConfig::default())
    }

    #[tokio::test]
    async fn run_job_enqueues_a_pending_task_with_the_right_name() {
        let backend = backend_with_echo();
        let id = backend
            .run_job("echo", vec![Value::from(1)], Map::new())
            .await
            .unwrap()
            .unwrap();
        let task = backend.get_task(GetTaskOptions::by_id(&id)).await.unwrap().unwrap();
        assert_eq!(task.name, "echo");
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn pulling_the_next_task_dequeues_in_fifo_order() {
        let backend = backend_with_echo();
        let id1 = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
        let id2 = backend.run_job("echo", vec![Value::from(2)], Map::new()).await.unwrap().unwrap();

        let first = backend.get_task(GetTaskOptions::next(Duration::from_millis(50))).await.unwrap().unwrap();
        assert_eq!(first.id, id1);
        let second = backend.get_task(GetTaskOptions::next(Duration::from_millis(50))).await.unwrap().unwrap();
        assert_eq!(second.id, id2);
    }

    #[tokio::test]
    async fn pulling_with_nothing_queued_times_out_to_none() {
        let backend = backend_with_echo();
        let result = backend.get_task(GetTaskOptions::next(Duration::from_millis(20))).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duplicate_run_job_before_completion_is_dropped() {
        let backend = backend_with_echo();
        let first = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap();
        let second = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(backend.num_tasks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_job_after_done_rekeys_the_old_record() {
        let backend = backend_with_echo();
        let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
        backend
            .save_task(&id, TaskPatch::default().with_status(TaskStatus::Started).with_time_started(Utc::now()))
            .await
            .unwrap();
        backend
            .save_task(&id, TaskPatch::default().with_status(TaskStatus::Success).with_result(Value::from(42)).with_time_ended(Utc::now()))
            .await
            .unwrap();

        let fresh = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap();
        assert_eq!(fresh, Some(id.clone()));
        // Exactly one archived record plus the new pending one under the same id.
        assert_eq!(backend.num_tasks().await.unwrap(), 2);
        let archived = backend
            .get_tasks(TaskFilter { name: Some("echo".into()), status: Some(vec![TaskStatus::Success]) })
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].result, Some(Value::from(42)));
        assert_ne!(archived[0].id, id);
    }

    #[tokio::test]
    async fn save_task_rejects_a_backwards_transition() {
        let backend = backend_with_echo();
        let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
        backend
            .save_task(&id, TaskPatch::default().with_status(TaskStatus::Started).with_time_started(Utc::now()))
            .await
            .unwrap();
        // Pending has lower precedence than Started; moving backwards is rejected.
        let rejected = backend
            .save_task(&id, TaskPatch::default().with_status(TaskStatus::Pending))
            .await
            .unwrap();
        assert_eq!(rejected.status, TaskStatus::Unknown);
        // Unknown is a READY_STATES member, so the "time_started and
        // time_ended both set, or never started" invariant must hold.
        assert!(rejected.time_started.is_some());
        assert!(rejected.time_ended.is_some());
    }

    #[tokio::test]
    async fn wait_for_task_resolves_once_another_task_marks_it_done() {
        let backend = backend_with_echo();
        let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
        let waiter_backend = Arc::clone(&backend);
        let waiter_id = id.clone();
        let waiter = tokio::spawn(async move {
            waiter_backend.wait_for_task(&waiter_id, Duration::from_secs(1)).await.unwrap()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        backend
            .save_task(&id, TaskPatch::default().with_status(TaskStatus::Started).with_time_started(Utc::now()))
            .await
            .unwrap();
        backend
            .save_task(&id, TaskPatch::default().with_status(TaskStatus::Success).with_result(Value::from(7)).with_time_ended(Utc::now()))
            .await
            .unwrap();
        let observed = waiter.await.unwrap().unwrap();
        assert_eq!(observed.status, TaskStatus::Success);
        assert_eq!(observed.result, Some(Value::from(7)));
    }

    #[tokio::test]
    async fn delete_tasks_is_idempotent() {
        let backend = backend_with_echo();
        let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
        assert_eq!(backend.delete_tasks(&[id.clone()]).await.unwrap(), 1);
        assert_eq!(backend.delete_tasks(&[id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tick_advances_a_due_entry_to_exactly_the_tick_time() {
        let registry = JobRegistry::new();
        registry.register(JobDescriptor::periodic("ticker", Duration::from_secs(60), echo_job));
        let mut config = TaskQueueConfig::default();
        config.schedule_periodic = true;
        let backend = MemoryBackend::new(registry, config);

        let last_run_at = Utc::now() - chrono::Duration::seconds(65);
        backend
            .entries()
            .insert(SchedulerEntry::new("ticker", Schedule::every(Duration::from_secs(60)), last_run_at));

        let now = Utc::now();
        backend.tick(now).await.unwrap();

        let entry = backend.entries().get("ticker").unwrap();
        assert_eq!(entry.total_run_count, 1);
        assert_eq!(entry.last_run_at, now);

        // A second tick at the same `now` must not fire again.
        backend.tick(now).await.unwrap();
        let entry = backend.entries().get("ticker").unwrap();
        assert_eq!(entry.total_run_count, 1);
    }
}
