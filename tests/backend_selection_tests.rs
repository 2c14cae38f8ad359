mod common;

use common::{task_store, wait_for_status, ToggleWorkflows};
use jobforge::{
    BackendMode, BackendSelection, BackendSelector, BrokerConfig, JobQueueService, JobStatus, QueueConfig,
    StandaloneConfig,
};
use std::time::{Duration, Instant};

fn unreachable_broker() -> BrokerConfig {
    // Nothing listens on port 1
    BrokerConfig::new().with_host("127.0.0.1").with_port(1)
}

#[tokio::test]
async fn test_unreachable_broker_falls_back_to_standalone() {
    let config = QueueConfig::default()
        .with_broker(unreachable_broker())
        .with_connect_timeout(Duration::from_millis(5000))
        .with_standalone(StandaloneConfig::default().with_poll_interval(Duration::from_millis(10)));

    let started = Instant::now();
    let service = JobQueueService::start(config, task_store(), ToggleWorkflows::succeeding()).await;
    assert!(started.elapsed() < Duration::from_millis(6000));
    assert_eq!(service.mode(), BackendMode::Standalone);

    let job_id = service.enqueue_job("t1", None).await.unwrap();
    let job = wait_for_status(&service, &job_id, JobStatus::Completed).await;
    assert_eq!(job.attempts, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_selector_reports_fallback_reason() {
    let config = QueueConfig::default()
        .with_broker(unreachable_broker())
        .with_connect_timeout(Duration::from_millis(500));

    match BackendSelector::new(&config).select().await {
        BackendSelection::Standalone { reason } => assert!(!reason.is_empty()),
        BackendSelection::Distributed(_) => panic!("expected standalone fallback"),
    }
}

#[tokio::test]
async fn test_force_flag_skips_broker() {
    let config = QueueConfig::default()
        .with_force_standalone(true)
        .with_connect_timeout(Duration::from_secs(30));

    let started = Instant::now();
    let selection = BackendSelector::new(&config).select().await;
    assert_eq!(selection.mode(), BackendMode::Standalone);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_force_flag_from_environment_lookup() {
    let config = QueueConfig::from_lookup(|key| match key {
        "JOB_QUEUE_FORCE_STANDALONE" => Some("true".to_string()),
        _ => None,
    })
    .unwrap();

    let service = JobQueueService::start(config, task_store(), ToggleWorkflows::succeeding()).await;
    assert_eq!(service.mode(), BackendMode::Standalone);
    service.shutdown().await.unwrap();
}
