//! Data model, backend contract and ambient plumbing shared by every
//! concrete task queue backend and the worker runtime that drives them.

pub mod backend;
pub mod callback;
pub mod config;
pub mod consumer;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod task;

pub use backend::{ExpiryArg, GetTaskOptions, TaskBackend, TaskFilter, TaskMeta, TaskPatch};
pub use callback::{CallbackTable, WhenDone};
pub use config::TaskQueueConfig;
pub use consumer::Consumer;
pub use error::{Result, TaskQueueError};
pub use registry::{JobDescriptor, JobFn, JobFuture, JobRegistry, JobResult, JobType, OverlapPolicy};
pub use schedule::{Schedule, SchedulerEntry, SchedulerTable};
pub use task::{is_admissible_transition, Task, TaskStatus, FULL_RUN_STATES, READY_STATES};
