//! The task executor: runs one task body to completion on the compute pool,
//! applying the timeout/expiry rules and classifying the outcome into a
//! terminal status.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use taskkernel_core::{Consumer, Task, TaskBackend, TaskPatch, TaskStatus};

/// How a job body's future resolved, before it is mapped onto a terminal
/// [`TaskStatus`]. A tagged outcome in place of a timeout-as-exception:
/// `tokio::time::timeout` already gives us `Err` on expiry, so there is no
/// exception to catch.
enum Outcome {
    Success(Value),
    Failed(String),
    TimedOut,
}

/// Run `task`'s job body to completion and persist the terminal state.
///
/// Called on the compute pool, never directly by the pull loop's own task,
/// so that a slow or panicking job body cannot starve polling for other
/// work.
pub async fn execute_task(backend: Arc<dyn TaskBackend>, worker_name: String, task: Task) {
    let Some(job) = backend.registry().get(&task.name) else {
        tracing::error!(task_id = %task.id, job = %task.name, "task references an unregistered job");
        let _ = backend
            .save_task(
                &task.id,
                TaskPatch::default()
                    .with_status(TaskStatus::Failure)
                    .with_result(Value::String("not in registry".to_string()))
                    .with_time_ended(Utc::now()),
            )
            .await;
        return;
    };

    // Another worker already claimed this task (or it's already terminal);
    // guards against a double-start under concurrent pollers.
    if !task.status.is_before_start() {
        tracing::debug!(task_id = %task.id, status = ?task.status, "task already claimed, skipping");
        return;
    }

    let now = Utc::now();
    if task.is_expired(now) {
        tracing::info!(task_id = %task.id, job = %task.name, "task expired before a worker picked it up");
        if let Err(e) = backend
            .save_task(&task.id, TaskPatch::default().with_status(TaskStatus::Revoked).with_time_ended(now))
            .await
        {
            tracing::error!(task_id = %task.id, error = %e, "failed to persist expiry revocation");
        }
        return;
    }

    let started = match backend
        .save_task(&task.id, TaskPatch::default().with_status(TaskStatus::Started).with_time_started(now))
        .await
    {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "failed to transition task to started, abandoning");
            return;
        }
    };

    let consumer = Consumer::new(Arc::clone(&backend), worker_name.clone(), task.id.clone(), task.name.clone());
    backend.on_start_task(&task.id).await;

    let body = (job.body)(consumer, started.args.clone(), started.kwargs.clone());
    let outcome = match job.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, body).await {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(message)) => Outcome::Failed(message),
            Err(_) => Outcome::TimedOut,
        },
        None => match body.await {
            Ok(value) => Outcome::Success(value),
            Err(message) => Outcome::Failed(message),
        },
    };

    let ended = Utc::now();
    let patch = match outcome {
        Outcome::Success(value) => {
            tracing::info!(task_id = %task.id, job = %task.name, "task succeeded");
            TaskPatch::default().with_status(TaskStatus::Success).with_result(value).with_time_ended(ended)
        }
        Outcome::Failed(message) => {
            tracing::error!(task_id = %task.id, job = %task.name, error = %message, "task body failed");
            TaskPatch::default()
                .with_status(TaskStatus::Failure)
                .with_result(Value::String(message))
                .with_time_ended(ended)
        }
        Outcome::TimedOut => {
            tracing::warn!(task_id = %task.id, job = %task.name, timeout = ?job.timeout, "task timed out mid-run");
            TaskPatch::default().with_status(TaskStatus::Revoked).with_time_ended(ended)
        }
    };

    if let Err(e) = backend.save_task(&task.id, patch).await {
        tracing::error!(task_id = %task.id, error = %e, "failed to persist terminal task state");
    }
    backend.on_finish_task(&task.id).await;
}
