//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobforge::{
    Broker, BrokerError, BrokerMessage, Delivery, Job, JobQueueService, JobStatus, MemoryBroker,
    MemoryTaskStore, NackOutcome, TaskRecord, WorkflowError, WorkflowRunner,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Workflow runner that fails with "boom" while `failing` is set.
#[derive(Default)]
pub struct ToggleWorkflows {
    pub failing: AtomicBool,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ToggleWorkflows {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(true),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowRunner for ToggleWorkflows {
    async fn execute_workflow_by_id(&self, _workflow_id: &str) -> Result<(), WorkflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(WorkflowError::new("boom"))
        } else {
            Ok(())
        }
    }
}

/// In-memory broker whose `add` can be switched to fail.
#[derive(Default)]
pub struct FlakyBroker {
    inner: MemoryBroker,
    rejecting: AtomicBool,
}

impl FlakyBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        self.inner.ping().await
    }

    async fn add(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(BrokerError::connection("broker unavailable"));
        }
        self.inner.add(message).await
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<usize, BrokerError> {
        self.inner.promote_delayed(now).await
    }

    async fn reserve(&self) -> Result<Option<Delivery>, BrokerError> {
        self.inner.reserve().await
    }

    async fn ack(&self, job_id: &str) -> Result<(), BrokerError> {
        self.inner.ack(job_id).await
    }

    async fn nack(&self, job_id: &str, error: &str) -> Result<NackOutcome, BrokerError> {
        self.inner.nack(job_id, error).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

/// A task store holding one generic task `t1` and one workflow task `wf1`.
pub fn task_store() -> Arc<MemoryTaskStore> {
    let tasks = Arc::new(MemoryTaskStore::new());
    tasks.insert_task(TaskRecord::generic("t1", "noop")).unwrap();
    tasks
        .insert_task(TaskRecord::scheduled_workflow("wf1", "workflow-1"))
        .unwrap();
    tasks
}

/// Poll the service until the job satisfies `done`, or panic after ~5s.
pub async fn wait_for<F>(service: &JobQueueService, job_id: &str, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    for _ in 0..500 {
        let job = service.get_job_by_id(job_id).await.unwrap().unwrap();
        if done(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let job = service.get_job_by_id(job_id).await.unwrap().unwrap();
    panic!("job {} never reached the expected state: {:?}", job_id, job);
}

/// Wait until the job reaches `status`.
pub async fn wait_for_status(service: &JobQueueService, job_id: &str, status: JobStatus) -> Job {
    wait_for(service, job_id, |job| job.status == status).await
}
