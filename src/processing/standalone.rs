//! Standalone dispatcher
//!
//! Polls the job store on a fixed interval and runs due jobs one at a time,
//! applying the same retry and backoff policy the broker would.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BackoffPolicy, Dispatcher, TaskExecutor};
use crate::backend::BackendMode;
use crate::config::{StandaloneConfig, MIN_INTERVAL};
use crate::core::{Job, JobStatus};
use crate::error::Result;
use crate::store::JobStore;

/// Timer-driven dispatcher for environments without a broker.
///
/// The job store is the dispatch list: each scan asks it for pending jobs
/// whose `next_run_at` has passed and executes them sequentially in
/// creation order. The next scan does not start until the current one has
/// finished.
pub struct StandaloneDispatcher {
    store: Arc<dyn JobStore>,
    executor: TaskExecutor,
    backoff: BackoffPolicy,
    config: StandaloneConfig,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StandaloneDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: TaskExecutor,
        backoff: BackoffPolicy,
        config: StandaloneConfig,
    ) -> Self {
        Self {
            store,
            executor,
            backoff,
            config,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Start the polling loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut handle) = self.handle.lock() else {
            error!("Standalone dispatcher state poisoned, not starting");
            return;
        };
        if handle.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let dispatcher = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            dispatcher.run().await;
        }));

        info!(
            "Standalone dispatcher started (poll interval {:?})",
            self.config.poll_interval
        );
    }

    async fn run(&self) {
        let mut ticker = interval(self.config.poll_interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Standalone poll failed: {}", e);
                    }
                }
            }
        }

        debug!("Standalone polling loop stopped");
    }

    /// Run one scan: execute every due job, one after another.
    ///
    /// Returns the number of jobs executed.
    pub async fn run_cycle(&self) -> Result<usize> {
        let due = self
            .store
            .due_jobs(Utc::now(), self.config.batch_size)
            .await?;

        if !due.is_empty() {
            debug!("Found {} due jobs", due.len());
        }

        let mut executed = 0;
        for job in due {
            if self.process_job(job).await {
                executed += 1;
            }
        }
        Ok(executed)
    }

    /// Execute one job and record the outcome. Returns `false` if the job
    /// could not be claimed.
    pub async fn process_job(&self, job: Job) -> bool {
        let job_id = job.id.as_str();

        if job.has_empty_payload() {
            warn!("Job {} has an empty payload, completing it", job_id);
            if let Err(e) = self
                .store
                .update_job_status(job_id, JobStatus::Completed, None)
                .await
            {
                error!("Failed to mark job {} as completed: {}", job_id, e);
            }
            return true;
        }

        if let Err(e) = self
            .store
            .update_job_status(job_id, JobStatus::Processing, None)
            .await
        {
            error!("Failed to mark job {} as processing: {}", job_id, e);
            return false;
        }

        match self.executor.execute(job_id, &job.payload).await {
            Ok(_) => {
                if let Err(e) = self
                    .store
                    .update_job_status(job_id, JobStatus::Completed, None)
                    .await
                {
                    error!("Failed to mark job {} as completed: {}", job_id, e);
                }
            }
            Err(e) => {
                let message = e.to_string();
                let attempts = job.attempts.saturating_add(1);

                let recorded = if attempts >= job.max_attempts {
                    warn!(
                        "Job {} failed permanently after {} attempts: {}",
                        job_id, attempts, message
                    );
                    self.store.update_job_failed(job_id, &message).await
                } else {
                    let next_run_at = self.backoff.next_run_at(attempts, Utc::now());
                    warn!(
                        "Job {} failed (attempt {}/{}), retrying at {}: {}",
                        job_id, attempts, job.max_attempts, next_run_at, message
                    );
                    self.store
                        .update_job_for_retry(job_id, &message, next_run_at)
                        .await
                };

                if let Err(e) = recorded {
                    error!("Failed to record failure of job {}: {}", job_id, e);
                }
            }
        }
        true
    }
}

#[async_trait]
impl Dispatcher for StandaloneDispatcher {
    fn mode(&self) -> BackendMode {
        BackendMode::Standalone
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        // The store is the dispatch list; the next scan picks the job up.
        debug!("Job {} queued for standalone polling", job.id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Standalone polling loop panicked: {}", e);
            }
        }

        info!("Standalone dispatcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Priority, TaskRecord};
    use crate::processing::{WorkflowError, WorkflowRunner};
    use crate::store::{MemoryJobStore, MemoryTaskStore};
    use std::time::Duration;

    struct NoWorkflows;

    #[async_trait]
    impl WorkflowRunner for NoWorkflows {
        async fn execute_workflow_by_id(&self, _workflow_id: &str) -> std::result::Result<(), WorkflowError> {
            Ok(())
        }
    }

    fn create_dispatcher() -> (StandaloneDispatcher, Arc<MemoryJobStore>, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let tasks = Arc::new(MemoryTaskStore::new());
        let executor = TaskExecutor::new(tasks.clone(), Arc::new(NoWorkflows));
        let dispatcher = StandaloneDispatcher::new(
            store.clone(),
            executor,
            BackoffPolicy::exponential(50),
            StandaloneConfig::default().with_poll_interval(Duration::from_millis(10)),
        );
        (dispatcher, store, tasks)
    }

    #[tokio::test]
    async fn test_cycle_completes_due_job() {
        let (dispatcher, store, tasks) = create_dispatcher();
        tasks.insert_task(TaskRecord::generic("t1", "noop")).unwrap();
        let job = Job::new("t1", Priority::DEFAULT, 3);
        store.insert_job(&job).await.unwrap();

        assert_eq!(dispatcher.run_cycle().await.unwrap(), 1);

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 0);
        assert!(job.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_schedules_backoff() {
        let (dispatcher, store, _tasks) = create_dispatcher();
        let job = Job::new("missing", Priority::DEFAULT, 3);
        store.insert_job(&job).await.unwrap();

        let before = Utc::now();
        dispatcher.run_cycle().await.unwrap();

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_run_at >= before + chrono::Duration::milliseconds(100));
        assert_eq!(dispatcher.run_cycle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_size_limits_cycle() {
        let (dispatcher, store, tasks) = create_dispatcher();
        let dispatcher = StandaloneDispatcher {
            config: StandaloneConfig::default().with_batch_size(2),
            ..dispatcher
        };
        for i in 0..3 {
            let task_id = format!("t{}", i);
            tasks.insert_task(TaskRecord::generic(task_id.as_str(), "noop")).unwrap();
            store.insert_job(&Job::new(task_id, Priority::DEFAULT, 3)).await.unwrap();
        }

        assert_eq!(dispatcher.run_cycle().await.unwrap(), 2);
        assert_eq!(dispatcher.run_cycle().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_completes_without_executing() {
        let (dispatcher, store, _tasks) = create_dispatcher();
        let job = Job::with_payload("t1", serde_json::json!({}), Priority::DEFAULT, 3);
        store.insert_job(&job).await.unwrap();

        assert_eq!(dispatcher.run_cycle().await.unwrap(), 1);

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_polls() {
        let (dispatcher, store, tasks) = create_dispatcher();
        let dispatcher = Arc::new(StandaloneDispatcher {
            config: StandaloneConfig {
                poll_interval: Duration::ZERO,
                batch_size: None,
            },
            ..dispatcher
        });
        tasks.insert_task(TaskRecord::generic("t1", "noop")).unwrap();
        let job = Job::new("t1", Priority::DEFAULT, 3);
        store.insert_job(&job).await.unwrap();

        dispatcher.start();
        for _ in 0..100 {
            let current = store.get_job(&job.id).await.unwrap().unwrap();
            if current.status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatcher.shutdown().await.unwrap();

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (dispatcher, store, tasks) = create_dispatcher();
        let dispatcher = Arc::new(dispatcher);
        tasks.insert_task(TaskRecord::generic("t1", "noop")).unwrap();
        let job = Job::new("t1", Priority::DEFAULT, 3);
        store.insert_job(&job).await.unwrap();

        dispatcher.start();
        for _ in 0..100 {
            let current = store.get_job(&job.id).await.unwrap().unwrap();
            if current.status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatcher.shutdown().await.unwrap();

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(dispatcher.mode(), BackendMode::Standalone);
    }
}
