//! The job registry: the set of named, callable jobs a backend can dispatch.
//!
//! Grounded on `openintent-kernel::registry::AdapterRegistry` — a
//! `DashMap`-backed concurrent table with typed accessors — generalized from
//! adapter bookkeeping to job descriptors.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::consumer::Consumer;

/// Outcome of a job body: either the JSON-serializable result, or a
/// stringified error message. Timeouts are classified by the executor, not
/// by the job body itself.
pub type JobResult = std::result::Result<Value, String>;
pub type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;

/// The callable body of a job. Boxed as a trait object because jobs are
/// registered once and invoked many times (including, for periodic jobs,
/// repeatedly), unlike a one-shot `FnOnce` task closure.
pub trait JobFn: Fn(Consumer, Vec<Value>, Map<String, Value>) -> JobFuture + Send + Sync {}
impl<F> JobFn for F where F: Fn(Consumer, Vec<Value>, Map<String, Value>) -> JobFuture + Send + Sync {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Regular,
    Periodic,
}

/// Whether concurrent runs of the same job are permitted.
#[derive(Clone)]
pub enum OverlapPolicy {
    Allow,
    Deny,
    Predicate(Arc<dyn Fn(&Task) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OverlapPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlapPolicy::Allow => write!(f, "Allow"),
            OverlapPolicy::Deny => write!(f, "Deny"),
            OverlapPolicy::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

use crate::task::Task;

pub type MakeTaskId = Arc<dyn Fn(&[Value], &Map<String, Value>) -> String + Send + Sync>;

/// A registered job: its identity, its dispatch policy, and its body.
#[derive(Clone)]
pub struct JobDescriptor {
    pub name: String,
    pub job_type: JobType,
    pub run_every: Option<Duration>,
    pub anchor: Option<DateTime<Utc>>,
    pub timeout: Option<Duration>,
    pub can_overlap: OverlapPolicy,
    pub make_task_id: MakeTaskId,
    pub body: Arc<dyn JobFn>,
}

impl std::fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("job_type", &self.job_type)
            .field("run_every", &self.run_every)
            .field("timeout", &self.timeout)
            .field("can_overlap", &self.can_overlap)
            .finish()
    }
}

impl JobDescriptor {
    /// A regular, on-demand job with the default (hash-of-arguments)
    /// deduplication id.
    pub fn regular<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Consumer, Vec<Value>, Map<String, Value>) -> JobFuture + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            make_task_id: default_task_id_fn(name.clone()),
            name,
            job_type: JobType::Regular,
            run_every: None,
            anchor: None,
            timeout: None,
            can_overlap: OverlapPolicy::Allow,
            body: Arc::new(body),
        }
    }

    pub fn periodic<F>(name: impl Into<String>, run_every: Duration, body: F) -> Self
    where
        F: Fn(Consumer, Vec<Value>, Map<String, Value>) -> JobFuture + Send + Sync + 'static,
    {
        let mut job = Self::regular(name, body);
        job.job_type = JobType::Periodic;
        job.run_every = Some(run_every);
        job
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_overlap(mut self, policy: OverlapPolicy) -> Self {
        self.can_overlap = policy;
        self
    }
}

/// Deterministic task id derived from a stable hash of the job name plus its
/// canonicalized arguments. `serde_json::Map` iterates in key-sorted order
/// by default, so this hash is insensitive to the caller's kwarg ordering.
pub fn default_task_id_fn(name: String) -> MakeTaskId {
    Arc::new(move |args, kwargs| deterministic_task_id(&name, args, kwargs))
}

pub fn deterministic_task_id(name: &str, args: &[Value], kwargs: &Map<String, Value>) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let canonical = serde_json::to_string(&(name, args, kwargs)).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{name}:{:016x}", hasher.finish())
}

/// Concurrent, clonable handle to the set of registered jobs.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Arc<JobDescriptor>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: JobDescriptor) {
        tracing::debug!(job = %descriptor.name, job_type = ?descriptor.job_type, "registering job");
        self.jobs.insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDescriptor>> {
        self.jobs.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn list_names(&self) -> Vec<String> {
        self.jobs.iter().map(|e| e.key().clone()).collect()
    }

    /// All periodic descriptors, used once at backend setup to seed the
    /// scheduler's entry table.
    pub fn filter_periodic(&self) -> Vec<Arc<JobDescriptor>> {
        self.jobs
            .iter()
            .filter(|e| e.value().job_type == JobType::Periodic)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_body(_c: Consumer, _a: Vec<Value>, _k: Map<String, Value>) -> JobFuture {
        Box::pin(async { Ok(Value::Null) })
    }

    #[test]
    fn deterministic_id_ignores_kwarg_order() {
        let mut a = Map::new();
        a.insert("x".into(), Value::from(1));
        a.insert("y".into(), Value::from(2));
        let mut b = Map::new();
        b.insert("y".into(), Value::from(2));
        b.insert("x".into(), Value::from(1));
        assert_eq!(
            deterministic_task_id("job", &[], &a),
            deterministic_task_id("job", &[], &b)
        );
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = JobRegistry::new();
        registry.register(JobDescriptor::regular("echo", noop_body));
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn filter_periodic_excludes_regular_jobs() {
        let registry = JobRegistry::new();
        registry.register(JobDescriptor::regular("regular", noop_body));
        registry.register(JobDescriptor::periodic(
            "ticker",
            Duration::from_secs(1),
            noop_body,
        ));
        let periodic = registry.filter_periodic();
        assert_eq!(periodic.len(), 1);
        assert_eq!(periodic[0].name, "ticker");
    }
}
