mod common;

use chrono::Utc;
use common::{task_store, wait_for, wait_for_status, ToggleWorkflows};
use jobforge::{
    BackendMode, BackoffPolicy, JobQueueService, JobStatus, JobStore, MemoryJobStore,
    QueueConfig, QueueError, StandaloneConfig, StandaloneDispatcher, TaskExecutor,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> QueueConfig {
    QueueConfig::default()
        .with_force_standalone(true)
        .with_backoff(BackoffPolicy::exponential(1))
        .with_standalone(StandaloneConfig::default().with_poll_interval(Duration::from_millis(10)))
}

/// A service whose poller only runs once, at startup.
fn idle_config() -> QueueConfig {
    QueueConfig::default()
        .with_force_standalone(true)
        .with_standalone(StandaloneConfig::default().with_poll_interval(Duration::from_secs(3600)))
}

async fn start(config: QueueConfig, workflows: Arc<ToggleWorkflows>) -> JobQueueService {
    JobQueueService::start(config, task_store(), workflows).await
}

#[tokio::test]
async fn test_successful_job_completes() {
    let service = start(fast_config(), ToggleWorkflows::succeeding()).await;
    assert_eq!(service.mode(), BackendMode::Standalone);

    let job_id = service.enqueue_job("t1", None).await.unwrap();
    let job = wait_for_status(&service, &job_id, JobStatus::Completed).await;

    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());
    assert!(job.last_run_at.is_some());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_job_exhausts_attempts() {
    let workflows = ToggleWorkflows::failing();
    let service = start(fast_config(), workflows.clone()).await;

    let job_id = service.enqueue_job("wf1", None).await.unwrap();
    let job = wait_for_status(&service, &job_id, JobStatus::Failed).await;

    assert_eq!(job.attempts, 3);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.last_error.as_deref(), Some("boom"));
    assert_eq!(workflows.calls(), 3);

    // Terminal until a manual retry
    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = service.get_job_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(workflows.calls(), 3);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_delay_doubles_with_each_attempt() {
    let store = Arc::new(MemoryJobStore::new());
    let base = 1_000;
    let dispatcher = StandaloneDispatcher::new(
        store.clone(),
        TaskExecutor::new(task_store(), ToggleWorkflows::failing()),
        BackoffPolicy::exponential(base),
        StandaloneConfig::default(),
    );

    let job = jobforge::Job::new("wf1", jobforge::Priority::DEFAULT, 3);
    store.insert_job(&job).await.unwrap();

    let mut previous_delay = 0;
    for attempt in 1..=2u32 {
        let current = store.get_job(&job.id).await.unwrap().unwrap();
        let before = Utc::now();
        dispatcher.process_job(current).await;
        let after = Utc::now();

        let updated = store.get_job(&job.id).await.unwrap().unwrap();
        let expected = chrono::Duration::milliseconds((base << attempt) as i64);
        assert_eq!(updated.status, JobStatus::Pending);
        assert_eq!(updated.attempts, attempt);
        assert!(updated.next_run_at >= before + expected);
        assert!(updated.next_run_at <= after + expected);

        let delay = (updated.next_run_at - before).num_milliseconds();
        assert!(delay > previous_delay);
        previous_delay = delay;
    }

    // Not due yet, so a scan leaves it alone
    assert_eq!(dispatcher.run_cycle().await.unwrap(), 0);

    let current = store.get_job(&job.id).await.unwrap().unwrap();
    dispatcher.process_job(current).await;
    let updated = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Failed);
    assert_eq!(updated.attempts, 3);
}

#[tokio::test]
async fn test_manual_retry_reruns_failed_job() {
    let workflows = ToggleWorkflows::failing();
    let service = start(fast_config(), workflows.clone()).await;

    let job_id = service.enqueue_job("wf1", None).await.unwrap();
    wait_for_status(&service, &job_id, JobStatus::Failed).await;

    workflows.set_failing(false);
    let before = Utc::now();
    assert!(service.retry_job(&job_id).await);

    let job = wait_for(&service, &job_id, |job| job.status != JobStatus::Failed).await;
    assert_eq!(job.attempts, 0);
    assert!(job.next_run_at <= Utc::now());
    assert!(job.next_run_at >= before);

    let job = wait_for_status(&service, &job_id, JobStatus::Completed).await;
    assert_eq!(job.attempts, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_rejected_unless_failed() {
    let service = start(idle_config(), ToggleWorkflows::succeeding()).await;
    let job_id = service.enqueue_job("t1", None).await.unwrap();

    for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed] {
        service.update_job_status(&job_id, status, None).await.unwrap();
        assert!(!service.retry_job(&job_id).await);
        let job = service.get_job_by_id(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, status);
    }

    assert!(!service.retry_job("no-such-job").await);
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_list_failed_jobs_in_creation_order() {
    let service = start(idle_config(), ToggleWorkflows::succeeding()).await;

    let mut failed_ids = Vec::new();
    for i in 0..15 {
        let job_id = service.enqueue_job("t1", None).await.unwrap();
        if i % 5 != 0 {
            service
                .update_job_status(&job_id, JobStatus::Failed, Some("boom"))
                .await
                .unwrap();
            failed_ids.push(job_id);
        }
    }

    let failed = service.list_jobs(Some(JobStatus::Failed), Some(10)).await.unwrap();
    assert_eq!(failed.len(), 10);
    assert!(failed.iter().all(|job| job.status == JobStatus::Failed));
    let ids: Vec<String> = failed.into_iter().map(|job| job.id).collect();
    assert_eq!(ids, failed_ids[..10].to_vec());

    let all_failed = service.list_jobs(Some(JobStatus::Failed), None).await.unwrap();
    assert_eq!(all_failed.len(), 12);

    let counts = service.job_counts().await.unwrap();
    assert_eq!(counts.get(&JobStatus::Failed), Some(&12));
    assert_eq!(counts.get(&JobStatus::Pending), Some(&3));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_task_enqueued_twice_yields_two_jobs() {
    let service = start(idle_config(), ToggleWorkflows::succeeding()).await;

    let first = service.enqueue_job("t1", None).await.unwrap();
    let second = service.enqueue_job("t1", None).await.unwrap();
    assert_ne!(first, second);

    let a = service.get_job_by_id(&first).await.unwrap();
    let b = service.get_job_by_id(&first).await.unwrap();
    assert_eq!(a, b);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enqueue_after_shutdown_fails() {
    let service = start(idle_config(), ToggleWorkflows::succeeding()).await;
    service.shutdown().await.unwrap();
    service.shutdown().await.unwrap();

    let result = service.enqueue_job("t1", None).await;
    assert_eq!(result, Err(QueueError::ShutDown));
}

#[tokio::test]
async fn test_missing_task_is_retried_like_any_failure() {
    let service = start(fast_config(), ToggleWorkflows::succeeding()).await;

    let job_id = service.enqueue_job("ghost", None).await.unwrap();
    let job = wait_for_status(&service, &job_id, JobStatus::Failed).await;

    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error.as_deref(), Some("Task not found: ghost"));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_zero_max_attempts_runs_once() {
    let workflows = ToggleWorkflows::failing();
    let service = start(fast_config().with_max_attempts(0), workflows.clone()).await;

    let job_id = service.enqueue_job("wf1", None).await.unwrap();
    let job = wait_for_status(&service, &job_id, JobStatus::Failed).await;

    assert_eq!(job.max_attempts, 1);
    assert_eq!(job.attempts, 1);
    assert_eq!(workflows.calls(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_zero_poll_interval_still_dispatches() {
    let config = QueueConfig::default()
        .with_force_standalone(true)
        .with_standalone(StandaloneConfig::default().with_poll_interval(Duration::ZERO));
    let service = start(config, ToggleWorkflows::succeeding()).await;

    let job_id = service.enqueue_job("t1", None).await.unwrap();
    let job = wait_for_status(&service, &job_id, JobStatus::Completed).await;
    assert_eq!(job.attempts, 0);

    service.shutdown().await.unwrap();
}
