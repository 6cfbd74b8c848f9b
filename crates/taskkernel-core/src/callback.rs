//! One-shot waiter table backing `wait_for_task`/`get_task(when_done: true)`.

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::task::{Task, TaskStatus};

/// Result of asking the table to wait on a task.
pub enum WhenDone {
    /// The task was already terminal; no waiting needed.
    Ready(Task),
    /// The task is still running; await this receiver for its final state.
    Pending(oneshot::Receiver<Task>),
}

/// Concurrent table of at-most-one waiter per task id.
#[derive(Default)]
pub struct CallbackTable {
    waiters: DashMap<String, oneshot::Sender<Task>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a task's completion, or resolve immediately if
    /// it is already done.
    ///
    /// Only one waiter is tracked per task id; registering a second waiter
    /// for the same id replaces the first, whose receiver then observes a
    /// closed channel. Multiplexing several observers onto one task id is
    /// the caller's responsibility.
    pub fn when_done(&self, task: &Task) -> WhenDone {
        if task.done() {
            return WhenDone::Ready(task.clone());
        }
        let (tx, rx) = oneshot::channel();
        if self.waiters.insert(task.id.clone(), tx).is_some() {
            tracing::trace!(task_id = %task.id, "replacing existing waiter for task");
        }
        WhenDone::Pending(rx)
    }

    /// Force a non-terminal task to `Revoked` and fulfil any waiter. Used on
    /// worker shutdown and cancellation, where a task can never naturally
    /// reach a terminal status.
    pub fn finish(&self, mut task: Task) -> Task {
        if !task.done() {
            task.status = TaskStatus::Revoked;
        }
        self.deliver(&task);
        task
    }

    /// Wake any registered waiter if `task` has naturally reached a terminal
    /// status. Called by backends after every `save_task` that could have
    /// changed status.
    pub fn on_status_change(&self, task: &Task) {
        if task.done() {
            self.deliver(task);
        }
    }

    fn deliver(&self, task: &Task) {
        if let Some((_, tx)) = self.waiters.remove(&task.id) {
            let _ = tx.send(task.clone());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pending_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            name: "job".to_string(),
            args: vec![],
            kwargs: Default::default(),
            status: TaskStatus::Started,
            time_executed: Utc::now(),
            time_started: Some(Utc::now()),
            time_ended: None,
            expiry: None,
            result: None,
            from_task: None,
        }
    }

    #[test]
    fn when_done_resolves_immediately_for_terminal_task() {
        let table = CallbackTable::new();
        let mut task = pending_task("t1");
        task.status = TaskStatus::Success;
        match table.when_done(&task) {
            WhenDone::Ready(t) => assert_eq!(t.id, "t1"),
            WhenDone::Pending(_) => panic!("expected immediate resolution"),
        }
    }

    #[tokio::test]
    async fn when_done_waits_then_fires_on_status_change() {
        let table = CallbackTable::new();
        let task = pending_task("t2");
        let rx = match table.when_done(&task) {
            WhenDone::Pending(rx) => rx,
            WhenDone::Ready(_) => panic!("expected pending"),
        };
        let mut done = task.clone();
        done.status = TaskStatus::Success;
        table.on_status_change(&done);
        let observed = rx.await.unwrap();
        assert_eq!(observed.status, TaskStatus::Success);
    }

    #[test]
    fn finish_forces_revoked_when_not_terminal() {
        let table = CallbackTable::new();
        let task = pending_task("t3");
        let finished = table.finish(task);
        assert_eq!(finished.status, TaskStatus::Revoked);
    }
}
