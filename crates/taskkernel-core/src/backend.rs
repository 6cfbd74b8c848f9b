//! The `TaskBackend` contract: the five storage primitives a concrete store
//! must provide, plus the dedup/dispatch/scheduling logic built on top of
//! them as default trait methods — mirroring the abstract-base-class shape
//! of the system this was distilled from, translated into Rust's provided
//! trait methods.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::callback::CallbackTable;
use crate::config::TaskQueueConfig;
use crate::error::{Result, TaskQueueError};
use crate::registry::{JobRegistry, JobType};
use crate::schedule::SchedulerTable;
use crate::task::Task;

/// Request shape for a point lookup or a pull-the-next-ready-task call.
#[derive(Debug, Clone, Default)]
pub struct GetTaskOptions {
    /// Look up this specific task id. `None` means "pull whatever is next".
    pub id: Option<String>,
    /// If set, don't return until the task reaches a terminal status (or
    /// `timeout` elapses).
    pub when_done: bool,
    pub timeout: Duration,
}

impl GetTaskOptions {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), when_done: false, timeout: Duration::ZERO }
    }

    pub fn next(timeout: Duration) -> Self {
        Self { id: None, when_done: false, timeout }
    }

    pub fn wait_for(id: impl Into<String>, timeout: Duration) -> Self {
        Self { id: Some(id.into()), when_done: true, timeout }
    }
}

/// Predicate used by `get_tasks`; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub name: Option<String>,
    pub status: Option<Vec<crate::task::TaskStatus>>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(name) = &self.name {
            if &task.name != name {
                return false;
            }
        }
        if let Some(statuses) = &self.status {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        true
    }
}

/// Absolute, relative or epoch-seconds expiry, as accepted by `create_task`.
#[derive(Debug, Clone, Copy)]
pub enum ExpiryArg {
    At(DateTime<Utc>),
    In(Duration),
    Epoch(i64),
}

impl ExpiryArg {
    fn resolve(self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ExpiryArg::At(dt) => dt,
            ExpiryArg::In(d) => from + chrono::Duration::from_std(d).unwrap_or_default(),
            ExpiryArg::Epoch(secs) => DateTime::from_timestamp(secs, 0).unwrap_or(from),
        }
    }
}

/// Constructor-only metadata not passed through to the job body.
#[derive(Debug, Clone, Default)]
pub struct TaskMeta {
    pub from_task: Option<String>,
}

/// A set of field-level updates applied to a stored task. `None` leaves a
/// field untouched; the doubly-optional fields distinguish "leave alone"
/// from "set to None".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub args: Option<Vec<Value>>,
    pub kwargs: Option<Map<String, Value>>,
    pub status: Option<crate::task::TaskStatus>,
    pub time_executed: Option<DateTime<Utc>>,
    pub time_started: Option<Option<DateTime<Utc>>>,
    pub time_ended: Option<Option<DateTime<Utc>>>,
    pub expiry: Option<Option<DateTime<Utc>>>,
    pub result: Option<Option<Value>>,
    pub from_task: Option<Option<String>>,
}

impl TaskPatch {
    /// Patch that fully specifies a brand-new task record.
    pub fn create(task: Task) -> Self {
        Self {
            name: Some(task.name),
            args: Some(task.args),
            kwargs: Some(task.kwargs),
            status: Some(task.status),
            time_executed: Some(task.time_executed),
            time_started: Some(task.time_started),
            time_ended: Some(task.time_ended),
            expiry: Some(task.expiry),
            result: Some(task.result),
            from_task: Some(task.from_task),
        }
    }

    pub fn with_status(mut self, status: crate::task::TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_time_started(mut self, ts: DateTime<Utc>) -> Self {
        self.time_started = Some(Some(ts));
        self
    }

    pub fn with_time_ended(mut self, ts: DateTime<Utc>) -> Self {
        self.time_ended = Some(Some(ts));
        self
    }

    pub fn with_result(mut self, value: Value) -> Self {
        self.result = Some(Some(value));
        self
    }

    /// Materialize a brand-new [`Task`] from a patch built by
    /// [`TaskPatch::create`]. Backends use this to construct the record they
    /// insert when `save_task` is called for an id not yet in the store;
    /// any field left `None` falls back to its empty/absent value rather
    /// than panicking, so a hand-built non-`create` patch won't blow up, but
    /// only a `create` patch produces a sensible task.
    pub fn into_new_task(self, id: &str) -> Task {
        Task {
            id: id.to_string(),
            name: self.name.unwrap_or_default(),
            args: self.args.unwrap_or_default(),
            kwargs: self.kwargs.unwrap_or_default(),
            status: self.status.unwrap_or(crate::task::TaskStatus::Pending),
            time_executed: self.time_executed.unwrap_or_else(Utc::now),
            time_started: self.time_started.unwrap_or(None),
            time_ended: self.time_ended.unwrap_or(None),
            expiry: self.expiry.unwrap_or(None),
            result: self.result.unwrap_or(None),
            from_task: self.from_task.unwrap_or(None),
        }
    }

    /// Apply this patch onto a clone of `base`, leaving untouched fields as
    /// they were.
    pub fn apply(&self, base: &Task) -> Task {
        let mut out = base.clone();
        if let Some(v) = &self.name {
            out.name = v.clone();
        }
        if let Some(v) = &self.args {
            out.args = v.clone();
        }
        if let Some(v) = &self.kwargs {
            out.kwargs = v.clone();
        }
        if let Some(v) = self.status {
            out.status = v;
        }
        if let Some(v) = self.time_executed {
            out.time_executed = v;
        }
        if let Some(v) = self.time_started {
            out.time_started = v;
        }
        if let Some(v) = self.time_ended {
            out.time_ended = v;
        }
        if let Some(v) = self.expiry {
            out.expiry = v;
        }
        if let Some(v) = &self.result {
            out.result = v.clone();
        }
        if let Some(v) = &self.from_task {
            out.from_task = v.clone();
        }
        out
    }
}

/// The storage contract a concrete task store implements. Five abstract
/// primitives plus accessors into the shared ambient state; everything else
/// (dedup, scheduling, dispatch bookkeeping) is a provided method built on
/// top of them, so every conforming backend gets identical semantics.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Mark a task ready for dispatch (e.g. push it onto a pull queue).
    async fn put_task(&self, id: &str) -> Result<()>;

    /// Point lookup or pull-next, per `opts`.
    async fn get_task(&self, opts: GetTaskOptions) -> Result<Option<Task>>;

    /// Best-effort, unordered scan matching `filter`.
    async fn get_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Upsert: create the task if `id` is new (the patch must be a
    /// `TaskPatch::create`), or apply `patch`'s fields over the existing
    /// record, enforcing [`crate::task::is_admissible_transition`] on the
    /// status field if one is present in the patch.
    async fn save_task(&self, id: &str, patch: TaskPatch) -> Result<Task>;

    async fn delete_tasks(&self, ids: &[String]) -> Result<usize>;

    async fn num_tasks(&self) -> Result<usize>;

    fn registry(&self) -> &JobRegistry;
    fn callbacks(&self) -> &CallbackTable;
    fn entries(&self) -> &SchedulerTable;
    fn config(&self) -> &TaskQueueConfig;

    /// Called immediately before a job body runs.
    async fn on_start_task(&self, _task_id: &str) {}

    /// Called immediately after a job body finishes, regardless of outcome.
    async fn on_finish_task(&self, _task_id: &str) {}

    /// Create a task record for `name(args, kwargs)`, applying deduplication
    /// against the job's deterministic id.
    ///
    /// Returns `Ok(None)` when an equivalent task is already in flight (the
    /// request is dropped, not queued); `Ok(Some(id))` with the task's id
    /// otherwise.
    async fn create_task(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        expiry: Option<ExpiryArg>,
        meta: TaskMeta,
    ) -> Result<Option<String>> {
        self.create_task_at(name, args, kwargs, expiry, meta, Utc::now()).await
    }

    /// Same as [`TaskBackend::create_task`], but `now` is supplied by the
    /// caller instead of read from the clock. The periodic scheduler's
    /// `tick` uses this so that a fired entry's `last_run_at` is exactly the
    /// `now` it was ticked with, not whatever the clock reads a moment
    /// later.
    async fn create_task_at(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        expiry: Option<ExpiryArg>,
        meta: TaskMeta,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let job = self
            .registry()
            .get(name)
            .ok_or_else(|| TaskQueueError::TaskNotAvailable { name: name.to_string() })?;

        let task_id = (job.make_task_id)(&args, &kwargs);

        let existing = self.get_task(GetTaskOptions::by_id(&task_id)).await?;
        if let Some(existing) = existing {
            if !existing.done() {
                tracing::debug!(task_id = %task_id, job = name, "task already requested, dropping");
                return Ok(None);
            }
            tracing::debug!(task_id = %task_id, job = name, "re-keying completed task to free deterministic id");
            self.handle_task_done(existing).await?;
        }

        if job.job_type == JobType::Periodic {
            self.entries().advance(name, now);
        }

        let resolved_expiry = expiry
            .map(|e| e.resolve(now))
            .or_else(|| job.timeout.map(|t| now + chrono::Duration::from_std(t).unwrap_or_default()));

        let task = Task {
            id: task_id.clone(),
            name: name.to_string(),
            args,
            kwargs,
            status: crate::task::TaskStatus::Pending,
            time_executed: now,
            time_started: None,
            time_ended: None,
            expiry: resolved_expiry,
            result: None,
            from_task: meta.from_task,
        };
        self.save_task(&task_id, TaskPatch::create(task)).await?;
        tracing::info!(task_id = %task_id, job = name, "task created");
        Ok(Some(task_id))
    }

    /// Create and immediately queue a task for dispatch.
    async fn run_job(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Option<String>> {
        self.run_job_at(name, args, kwargs, Utc::now()).await
    }

    /// Same as [`TaskBackend::run_job`], but threads an explicit `now`
    /// through to [`TaskBackend::create_task_at`]. See that method's doc
    /// comment for why the periodic tick needs this.
    async fn run_job_at(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        match self.create_task_at(name, args, kwargs, None, TaskMeta::default(), now).await {
            Ok(Some(id)) => {
                self.put_task(&id).await?;
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::error!(job = name, error = %e, "run_job failed");
                Err(e)
            }
        }
    }

    /// Re-key a completed task under a fresh id, freeing its deterministic
    /// id for a new request while preserving the completed record's result
    /// history.
    async fn handle_task_done(&self, task: Task) -> Result<()> {
        let mut archived = task.clone();
        archived.id = Uuid::now_v7().to_string();
        self.delete_tasks(&[task.id]).await?;
        self.save_task(&archived.id.clone(), TaskPatch::create(archived)).await?;
        Ok(())
    }

    /// Block (up to `timeout`) until `task_id` reaches a terminal status.
    async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> Result<Option<Task>> {
        self.get_task(GetTaskOptions::wait_for(task_id, timeout)).await
    }

    /// Drive the periodic scheduler forward by one step: fire every entry
    /// due at `now`, and report how long until the next one is due.
    ///
    /// Idempotent with respect to actual fires: entries advance inside
    /// `create_task_at` (called transitively via `run_job_at` with this same
    /// `now`), so calling `tick` twice for the same `now` only fires an
    /// entry once, and the entry's `last_run_at` ends up exactly `now`.
    async fn tick(&self, now: DateTime<Utc>) -> Result<Option<Duration>> {
        if !self.config().schedule_periodic {
            return Ok(None);
        }
        let snapshot = self.entries().snapshot();
        let mut remaining = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            let (due, rem) = entry.is_due(now);
            if due {
                if let Err(e) = self.run_job_at(&entry.name, Vec::new(), Map::new(), now).await {
                    tracing::error!(job = %entry.name, error = %e, "periodic tick run_job failed");
                }
            }
            remaining.push(rem);
        }
        Ok(remaining.into_iter().min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[test]
    fn create_patch_round_trips_through_into_new_task() {
        let task = Task {
            id: "t1".into(),
            name: "send_email".into(),
            args: vec![Value::from(1)],
            kwargs: Map::new(),
            status: TaskStatus::Pending,
            time_executed: Utc::now(),
            time_started: None,
            time_ended: None,
            expiry: None,
            result: None,
            from_task: None,
        };
        let rebuilt = TaskPatch::create(task.clone()).into_new_task(&task.id);
        assert_eq!(rebuilt.name, "send_email");
        assert_eq!(rebuilt.args, task.args);
    }

    #[test]
    fn expiry_arg_resolves_relative_duration() {
        let from = Utc::now();
        let resolved = ExpiryArg::In(Duration::from_secs(30)).resolve(from);
        assert!(resolved > from);
    }
}
