//! Job lifecycle API
//!
//! [`JobQueueService`] owns the job store and the running backend. Construct
//! one at process start and share it by reference.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::{Backend, BackendMode, BackendSelection, BackendSelector};
use crate::broker::Broker;
use crate::config::QueueConfig;
use crate::core::{Job, JobStatus, Priority};
use crate::error::{QueueError, Result};
use crate::processing::{
    Dispatcher, DistributedDispatcher, StandaloneDispatcher, TaskExecutor, WorkflowRunner,
};
use crate::store::{JobStore, MemoryJobStore, StorageError, TaskStore, DEFAULT_LIST_LIMIT};

/// The job queue: enqueue, query, list, manual retry and shutdown.
///
/// ## Examples
///
/// ```rust
/// use std::sync::Arc;
/// use jobforge::{
///     JobQueueService, JobStatus, MemoryTaskStore, QueueConfig, TaskRecord, WorkflowError,
///     WorkflowRunner,
/// };
///
/// struct Workflows;
///
/// #[async_trait::async_trait]
/// impl WorkflowRunner for Workflows {
///     async fn execute_workflow_by_id(&self, _id: &str) -> Result<(), WorkflowError> {
///         Ok(())
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let tasks = Arc::new(MemoryTaskStore::new());
/// tasks.insert_task(TaskRecord::generic("t1", "report")).unwrap();
///
/// let config = QueueConfig::default().with_force_standalone(true);
/// let service = JobQueueService::start(config, tasks, Arc::new(Workflows)).await;
///
/// let job_id = service.enqueue_job("t1", None).await.unwrap();
/// let job = service.get_job_by_id(&job_id).await.unwrap().unwrap();
/// assert_eq!(job.task_id, "t1");
///
/// service.shutdown().await.unwrap();
/// # });
/// ```
pub struct JobQueueService {
    store: Arc<dyn JobStore>,
    backend: Backend,
    config: QueueConfig,
    shut_down: AtomicBool,
}

impl JobQueueService {
    /// Select a backend and start it.
    ///
    /// Falls back to standalone mode, with an in-memory job store, whenever
    /// the broker cannot be reached.
    pub async fn start(
        config: QueueConfig,
        task_store: Arc<dyn TaskStore>,
        workflows: Arc<dyn WorkflowRunner>,
    ) -> Self {
        let selection = BackendSelector::new(&config).select().await;

        match selection {
            BackendSelection::Distributed(parts) => {
                Self::distributed(config, parts.broker, parts.store, task_store, workflows)
            }
            BackendSelection::Standalone { .. } => Self::standalone(
                config,
                Arc::new(MemoryJobStore::new()),
                task_store,
                workflows,
            ),
        }
    }

    /// Run standalone over `store`, starting the polling loop.
    pub fn standalone(
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        task_store: Arc<dyn TaskStore>,
        workflows: Arc<dyn WorkflowRunner>,
    ) -> Self {
        let dispatcher = Arc::new(StandaloneDispatcher::new(
            store.clone(),
            TaskExecutor::new(task_store, workflows),
            config.backoff,
            config.standalone.clone(),
        ));
        dispatcher.start();

        Self::with_backend(config, store, Backend::Standalone(dispatcher))
    }

    /// Run distributed over `broker`, starting the consumer and scheduler.
    pub fn distributed(
        config: QueueConfig,
        broker: Arc<dyn Broker>,
        store: Arc<dyn JobStore>,
        task_store: Arc<dyn TaskStore>,
        workflows: Arc<dyn WorkflowRunner>,
    ) -> Self {
        let dispatcher = Arc::new(DistributedDispatcher::new(
            broker,
            store.clone(),
            TaskExecutor::new(task_store, workflows),
            config.backoff,
            config.distributed.clone(),
        ));
        dispatcher.start();

        Self::with_backend(config, store, Backend::Distributed(dispatcher))
    }

    fn with_backend(config: QueueConfig, store: Arc<dyn JobStore>, backend: Backend) -> Self {
        info!("Job queue service started in {} mode", backend.mode());
        Self {
            store,
            backend,
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The backend committed at startup
    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create a job for `task_id` and hand it to the backend.
    ///
    /// Every call yields a new job, even for a task that already has one. If
    /// the backend rejects the job, the stored record is marked `failed`
    /// with the backend error so a manual retry can pick it up, and the
    /// error is returned.
    pub async fn enqueue_job(&self, task_id: &str, priority: Option<Priority>) -> Result<String> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }

        let job = Job::new(
            task_id,
            priority.unwrap_or_default(),
            self.config.max_attempts,
        );
        self.store.insert_job(&job).await?;
        if let Err(e) = self.backend.enqueue(&job).await {
            let message = e.to_string();
            warn!("Failed to submit job {} to the backend: {}", job.id, message);
            if let Err(store_err) = self
                .store
                .update_job_status(&job.id, JobStatus::Failed, Some(&message))
                .await
            {
                error!("Failed to mark job {} as failed: {}", job.id, store_err);
            }
            return Err(e);
        }

        info!("Enqueued job {} for task {} (priority {})", job.id, task_id, job.priority);
        Ok(job.id)
    }

    /// Fetch a job by id
    pub async fn get_job_by_id(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.store.get_job(job_id).await?)
    }

    /// Unconditionally set a job's status
    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job> {
        Ok(self.store.update_job_status(job_id, status, error).await?)
    }

    /// Record a failure to be retried at `next_run_at`
    pub async fn update_job_for_retry(
        &self,
        job_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<Job> {
        Ok(self
            .store
            .update_job_for_retry(job_id, error, next_run_at)
            .await?)
    }

    /// Jobs in creation order, optionally filtered by status. `limit`
    /// defaults to [`DEFAULT_LIST_LIMIT`].
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Job>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        Ok(self.store.list_jobs(status, limit).await?)
    }

    /// Number of jobs per status
    pub async fn job_counts(&self) -> Result<HashMap<JobStatus, usize>> {
        Ok(self.store.job_counts().await?)
    }

    /// Manually retry a failed job.
    ///
    /// Resets the attempt counter and makes the job due now; in distributed
    /// mode it is resubmitted ahead of regular traffic. Returns `false`, and
    /// logs why, when the job is unknown, not failed, or the backend rejects
    /// it.
    pub async fn retry_job(&self, job_id: &str) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            warn!("Cannot retry job {}: job queue is shut down", job_id);
            return false;
        }

        let previous = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Cannot retry job {}: job not found", job_id);
                return false;
            }
            Err(e) => {
                warn!("Cannot retry job {}: {}", job_id, e);
                return false;
            }
        };

        let job = match self.store.reset_failed_job(job_id, Utc::now()).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Cannot retry job {}: it is not in failed status", job_id);
                return false;
            }
            Err(StorageError::JobNotFound { .. }) => {
                warn!("Cannot retry job {}: job not found", job_id);
                return false;
            }
            Err(e) => {
                warn!("Cannot retry job {}: {}", job_id, e);
                return false;
            }
        };

        let resubmission = Job {
            priority: Priority::MANUAL_RETRY,
            ..job
        };
        if let Err(e) = self.backend.enqueue(&resubmission).await {
            warn!("Failed to resubmit job {} for retry: {}", job_id, e);
            if let Err(restore_err) = self.store.restore_failure(job_id, &previous).await {
                error!(
                    "Failed to restore job {} after rejected retry: {}",
                    job_id, restore_err
                );
            }
            return false;
        }

        info!("Job {} reset for manual retry", job_id);
        true
    }

    /// Stop the backend. Further enqueues fail with [`QueueError::ShutDown`].
    ///
    /// Calling it more than once is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.shutdown().await?;
        info!("Job queue service shut down");
        Ok(())
    }
}
