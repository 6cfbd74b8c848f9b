//! The worker runtime: the pull loop, the task executor and the periodic
//! scheduler's tick driver, wired together around a
//! `taskkernel_core::TaskBackend`.

pub mod executor;
pub mod hooks;
pub mod pull;
pub mod scheduler;
pub mod worker;

pub use executor::execute_task;
pub use hooks::{BoxFuture, ComputePool, TokioComputePool};
pub use pull::{run_pull_loop, PullLoopConfig};
pub use scheduler::SchedulerDriver;
pub use worker::{Worker, WorkerConfig, WorkerHandles};
