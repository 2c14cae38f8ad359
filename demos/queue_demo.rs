//! Runs the job queue with a handful of tasks, one of which fails until it is
//! retried by hand.
//!
//! Set `REDIS_HOST`/`REDIS_PORT` to use a broker; without one the service
//! falls back to standalone mode.

use async_trait::async_trait;
use jobforge::{
    BackoffPolicy, JobQueueService, JobStatus, MemoryTaskStore, QueueConfig, StandaloneConfig,
    TaskRecord, WorkflowError, WorkflowRunner,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fails the "flaky" workflow until `fixed` is set.
struct DemoWorkflows {
    fixed: AtomicBool,
}

#[async_trait]
impl WorkflowRunner for DemoWorkflows {
    async fn execute_workflow_by_id(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if workflow_id == "flaky" && !self.fixed.load(Ordering::SeqCst) {
            return Err(WorkflowError::new("upstream service unavailable"));
        }
        info!("Workflow {} finished", workflow_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    println!("🚀 jobforge Demo");
    println!("=================\n");

    let tasks = Arc::new(MemoryTaskStore::new());
    tasks.insert_task(TaskRecord::generic("cleanup", "purge-temp-files"))?;
    tasks.insert_task(TaskRecord::scheduled_workflow("report", "weekly-report"))?;
    tasks.insert_task(TaskRecord::scheduled_workflow("sync", "flaky"))?;

    let workflows = Arc::new(DemoWorkflows {
        fixed: AtomicBool::new(false),
    });

    let config = QueueConfig::from_env()?
        .with_connect_timeout(Duration::from_secs(2))
        .with_backoff(BackoffPolicy::exponential(100))
        .with_standalone(StandaloneConfig::default().with_poll_interval(Duration::from_millis(200)));

    let service = JobQueueService::start(config, tasks, workflows.clone()).await;
    println!("✅ Job queue running in {} mode\n", service.mode());

    let mut job_ids = Vec::new();
    for task_id in ["cleanup", "report", "sync"] {
        let job_id = service.enqueue_job(task_id, None).await?;
        println!("📨 Enqueued {} as job {}", task_id, job_id);
        job_ids.push(job_id);
    }

    tokio::time::sleep(Duration::from_secs(3)).await;

    println!("\n📊 Job status:");
    for job_id in &job_ids {
        if let Some(job) = service.get_job_by_id(job_id).await? {
            println!(
                "  {} ({}): {} attempts={} last_error={:?}",
                job.id, job.task_id, job.status, job.attempts, job.last_error
            );
        }
    }

    let failed = service.list_jobs(Some(JobStatus::Failed), None).await?;
    if !failed.is_empty() {
        println!("\n🔁 Fixing the flaky workflow and retrying {} job(s)", failed.len());
        workflows.fixed.store(true, Ordering::SeqCst);
        for job in &failed {
            service.retry_job(&job.id).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("\n📈 Final counts:");
    for (status, count) in service.job_counts().await? {
        println!("  {}: {}", status, count);
    }

    service.shutdown().await?;
    println!("\n👋 Shut down cleanly");
    Ok(())
}
