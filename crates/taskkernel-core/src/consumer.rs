//! The per-task scope handed to a job body while it runs.

use std::sync::Arc;

use crate::backend::TaskBackend;

/// Opaque handle passed to a job body for the duration of a single
/// execution. Carries enough context for the job to talk back to the
/// backend (e.g. to enqueue a follow-up job) without needing its own copy of
/// the worker's internals.
#[derive(Clone)]
pub struct Consumer {
    pub backend: Arc<dyn TaskBackend>,
    pub worker_name: String,
    pub task_id: String,
    pub job_name: String,
}

impl Consumer {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        worker_name: impl Into<String>,
        task_id: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            worker_name: worker_name.into(),
            task_id: task_id.into(),
            job_name: job_name.into(),
        }
    }
}
