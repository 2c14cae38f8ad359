//! Job Processing Engine
//!
//! This module contains the task executor shared by both backends, the
//! retry backoff policy, and the two dispatchers that decide when a job
//! runs: [`DistributedDispatcher`] (broker-backed) and
//! [`StandaloneDispatcher`] (in-process polling).

use async_trait::async_trait;

use crate::backend::BackendMode;
use crate::core::Job;
use crate::error::Result;

pub mod distributed;
pub mod executor;
pub mod retry;
pub mod standalone;

pub use distributed::DistributedDispatcher;
pub use executor::{ExecutionError, TaskExecutor, WorkflowError, WorkflowRunner};
pub use retry::{BackoffPolicy, DEFAULT_BACKOFF_MS};
pub use standalone::StandaloneDispatcher;

/// Capabilities shared by both execution backends
///
/// The job store record is always written before [`Dispatcher::enqueue`] is
/// called; the dispatcher only arranges for the job to be delivered.
///
/// Both backends treat a job whose payload is `null` or `{}` the same way:
/// it is marked `completed` without running the executor, and a warning is
/// logged.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Which backend this dispatcher implements
    fn mode(&self) -> BackendMode;

    /// Schedule a stored job for execution
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Stop accepting work and release backend resources
    ///
    /// Jobs already handed to the executor are allowed to finish.
    async fn shutdown(&self) -> Result<()>;
}
