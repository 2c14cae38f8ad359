use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::core::{Job, JobStatus, TaskRecord, TaskUpdate};

pub mod error;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod task;

pub use error::StorageError;
pub use memory::MemoryJobStore;
#[cfg(feature = "redis")]
pub use redis::RedisJobStore;
pub use task::MemoryTaskStore;

/// Page size used by [`JobQueueService::list_jobs`](crate::JobQueueService::list_jobs) when the caller doesn't pick one.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Durable record of every job's lifecycle.
///
/// The job store is the single source of truth for job status visible to
/// API consumers, regardless of which backend dispatches the job. Every
/// mutation is a single-record update keyed by job id; implementations must
/// make each one atomic with respect to other writes on the same job.
///
/// ## Backends
///
/// - **[`MemoryJobStore`]**: insertion-ordered in-process store. In standalone
///   mode it doubles as the dispatch list.
/// - **[`RedisJobStore`]**: JSON records with status and creation-order
///   indexes (requires the `redis` feature).
///
/// ## Examples
///
/// ```rust
/// use jobforge::{Job, JobStatus, MemoryJobStore, Priority};
/// use jobforge::store::JobStore;
///
/// # tokio_test::block_on(async {
/// let store = MemoryJobStore::new();
/// let job = Job::new("t1", Priority::DEFAULT, 3);
/// store.insert_job(&job).await.unwrap();
///
/// let updated = store
///     .update_job_status(&job.id, JobStatus::Completed, None)
///     .await
///     .unwrap();
/// assert_eq!(updated.status, JobStatus::Completed);
/// # });
/// ```
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    ///
    /// Fails with [`StorageError::DuplicateJob`] if the id is already present.
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Fetch a job by id.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StorageError>;

    /// Unconditionally write a new status, recording `error` as the last
    /// error when given. Entering `Processing` stamps `last_run_at`.
    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StorageError>;

    /// Record a failure that will be retried: status back to `Pending`,
    /// `attempts` + 1, last error and `next_run_at` set.
    async fn update_job_for_retry(
        &self,
        job_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<Job, StorageError>;

    /// Record the failure that spends the attempt budget: status `Failed`,
    /// `attempts` + 1, last error set.
    async fn update_job_failed(&self, job_id: &str, error: &str) -> Result<Job, StorageError>;

    /// Reset a job for a manual retry if, and only if, it is `Failed`.
    ///
    /// Returns `Ok(None)` when the job exists but is in any other status.
    async fn reset_failed_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StorageError>;

    /// Write back the status, attempts, last error and `next_run_at` held in
    /// `snapshot`. Used to undo a manual-retry reset the backend rejected.
    async fn restore_failure(&self, job_id: &str, snapshot: &Job) -> Result<Job, StorageError>;

    /// List jobs in creation order (oldest first), optionally filtered by
    /// status, capped at `limit`.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StorageError>;

    /// Jobs that are `Pending` with `next_run_at <= now`, in creation order.
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Count jobs per status.
    async fn job_counts(&self) -> Result<HashMap<JobStatus, usize>, StorageError>;
}

/// Access to the task records the executor marks.
///
/// The task relation belongs to the surrounding application; the queue only
/// reads a record and writes its status, result and error.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a task record by id.
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StorageError>;

    /// Apply a status update. Returns `Ok(false)` if the task doesn't exist.
    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<bool, StorageError>;
}
