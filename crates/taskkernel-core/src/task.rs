//! The `Task` entity and its status state machine.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The eight statuses a task can carry over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Retry,
    Started,
    Revoked,
    Failure,
    Success,
    /// Terminal catch-all used when a precedence check rejects an update.
    Unknown,
}

/// Statuses from which a task is no longer eligible for dispatch or retry.
///
/// `Unknown` is kept here alongside the three named terminal statuses: it is
/// the precedence check's own terminal catch-all, and treating it as
/// anything other than ready would let a task that lost a transition race
/// block its deterministic id from ever being re-keyed (see `create_task`'s
/// dedup check). Backends that force a task to `Unknown` stamp `time_ended`
/// at the same time, so the invariant below still holds for it.
pub const READY_STATES: &[TaskStatus] = &[
    TaskStatus::Success,
    TaskStatus::Failure,
    TaskStatus::Revoked,
    TaskStatus::Unknown,
];

/// The set of statuses for which a task has actually run to completion.
pub const FULL_RUN_STATES: &[TaskStatus] = &[TaskStatus::Failure, TaskStatus::Success];

impl TaskStatus {
    /// Lower value means higher precedence: a save that would move a task to
    /// a status with equal-or-lower precedence than its current one is
    /// rejected, except for a small set of explicit progressions handled by
    /// [`is_admissible_transition`].
    fn precedence(self) -> i8 {
        match self {
            TaskStatus::Unknown => -1,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Revoked => 0,
            TaskStatus::Started => 3,
            TaskStatus::Queued => 4,
            TaskStatus::Retry => 5,
            TaskStatus::Pending => 6,
        }
    }

    pub fn is_ready(self) -> bool {
        READY_STATES.contains(&self)
    }

    /// Whether a task carrying this status has not yet been claimed by an
    /// executor — i.e. its precedence is strictly greater than `Started`'s.
    /// The executor's double-start guard uses this to decide whether another
    /// worker already owns the task.
    pub fn is_before_start(self) -> bool {
        self.precedence() > TaskStatus::Started.precedence()
    }
}

/// Whether a proposed status transition from `current` to `target` is
/// admissible. Named progressions (the normal run lifecycle, the pre-start
/// expiry path, and retry re-entry) are allowed outright; anything else must
/// strictly increase precedence.
pub fn is_admissible_transition(current: TaskStatus, target: TaskStatus) -> bool {
    use TaskStatus::*;
    match (current, target) {
        (Pending, Queued)
        | (Queued, Started)
        | (Pending, Started)
        | (Started, Success)
        | (Started, Failure)
        | (Started, Revoked)
        | (Pending, Revoked)
        | (Queued, Revoked)
        | (Retry, Pending) => true,
        _ => target.precedence() < current.precedence(),
    }
}

/// A single unit of work tracked by a [`crate::backend::TaskBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub status: TaskStatus,
    pub time_executed: DateTime<Utc>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_ended: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    /// Id of the task whose completion enqueued this one, if any.
    pub from_task: Option<String>,
}

impl Task {
    /// Whether this task has reached a terminal status.
    pub fn done(&self) -> bool {
        self.status.is_ready()
    }

    /// Whether `now` is past this task's expiry, if one is set.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|e| now > e).unwrap_or(false)
    }

    /// Wall-clock duration between execution request and completion, if both
    /// timestamps are present. Uses `time_ended` when set, falling back to
    /// `time_started` for a task that expired before it ran.
    pub fn run_duration(&self) -> Option<ChronoDuration> {
        let end = self.time_ended.or(self.time_started)?;
        Some(end - self.time_executed)
    }
}
