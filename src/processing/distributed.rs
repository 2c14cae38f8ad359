//! Distributed dispatcher
//!
//! Bridges broker deliveries to job store updates. A consumer task reserves
//! messages and runs each on its own task, bounded by a semaphore; a
//! scheduler task moves delayed retries back into the waiting set when they
//! fall due.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{BackoffPolicy, Dispatcher, TaskExecutor};
use crate::backend::BackendMode;
use crate::broker::{Broker, BrokerMessage, Delivery, NackOutcome};
use crate::config::{DistributedConfig, MIN_INTERVAL};
use crate::core::{Job, JobStatus};
use crate::error::Result;
use crate::store::JobStore;

#[derive(Default)]
struct LoopHandles {
    consumer: Option<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
}

/// Broker-backed dispatcher.
///
/// Every transition observed on the broker is mirrored into the job store
/// immediately; store failures are logged and never stop consumption.
pub struct DistributedDispatcher {
    broker: Arc<dyn Broker>,
    store: Arc<dyn JobStore>,
    executor: TaskExecutor,
    backoff: BackoffPolicy,
    config: DistributedConfig,
    consumer_shutdown: CancellationToken,
    scheduler_shutdown: CancellationToken,
    in_flight: TaskTracker,
    handles: Mutex<LoopHandles>,
}

impl DistributedDispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn JobStore>,
        executor: TaskExecutor,
        backoff: BackoffPolicy,
        config: DistributedConfig,
    ) -> Self {
        Self {
            broker,
            store,
            executor,
            backoff,
            config,
            consumer_shutdown: CancellationToken::new(),
            scheduler_shutdown: CancellationToken::new(),
            in_flight: TaskTracker::new(),
            handles: Mutex::new(LoopHandles::default()),
        }
    }

    /// Start the consumer and the delayed-retry scheduler. Calling it again
    /// while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut handles) = self.handles.lock() else {
            error!("Distributed dispatcher state poisoned, not starting");
            return;
        };
        if handles.consumer.is_some() || self.consumer_shutdown.is_cancelled() {
            return;
        }

        let consumer = Arc::clone(self);
        handles.consumer = Some(tokio::spawn(async move {
            consumer.consume().await;
        }));

        let scheduler = Arc::clone(self);
        handles.scheduler = Some(tokio::spawn(async move {
            scheduler.schedule().await;
        }));

        info!(
            "Distributed dispatcher started (concurrency {})",
            self.config.concurrency
        );
    }

    async fn consume(self: Arc<Self>) {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        loop {
            let permit = tokio::select! {
                _ = self.consumer_shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if self.consumer_shutdown.is_cancelled() {
                break;
            }

            match self.broker.reserve().await {
                Ok(Some(delivery)) => {
                    let dispatcher = Arc::clone(&self);
                    self.in_flight.spawn(async move {
                        dispatcher.handle_delivery(delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.pause(self.config.poll_interval.max(MIN_INTERVAL)).await;
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to reserve a message: {}", e);
                    self.pause(self.config.error_backoff).await;
                }
            }
        }

        debug!("Consumer loop stopped");
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.consumer_shutdown.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    async fn schedule(self: Arc<Self>) {
        let mut ticker = interval(self.config.scheduler_interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.scheduler_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.broker.promote_delayed(Utc::now()).await {
                        Ok(0) => {}
                        Ok(promoted) => debug!("Promoted {} delayed retries", promoted),
                        Err(e) => error!("Failed to promote delayed retries: {}", e),
                    }
                }
            }
        }

        debug!("Scheduler loop stopped");
    }

    /// Process one delivery: execute it, then ack or nack and mirror the
    /// outcome into the job store.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let message = delivery.message;
        let job_id = message.job_id.as_str();

        if message.has_empty_payload() {
            warn!("Job {} delivered with an empty payload, completing it", job_id);
            if let Err(e) = self.broker.ack(job_id).await {
                error!("Failed to ack job {}: {}", job_id, e);
            }
            self.on_completed(job_id).await;
            return;
        }

        debug!(
            "Processing job {} (attempt {})",
            job_id,
            delivery.attempts_made + 1
        );
        if let Err(e) = self
            .store
            .update_job_status(job_id, JobStatus::Processing, None)
            .await
        {
            error!("Failed to mark job {} as processing: {}", job_id, e);
        }

        match self.executor.execute(job_id, &message.payload).await {
            Ok(_) => {
                if let Err(e) = self.broker.ack(job_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                self.on_completed(job_id).await;
            }
            Err(e) => {
                let error_message = e.to_string();
                match self.broker.nack(job_id, &error_message).await {
                    Ok(outcome) => self.on_failed(job_id, &error_message, outcome).await,
                    Err(nack_err) => {
                        error!("Failed to nack job {}: {}", job_id, nack_err);
                        if let Err(e) = self
                            .store
                            .update_job_status(job_id, JobStatus::Failed, Some(&error_message))
                            .await
                        {
                            error!("Failed to mark job {} as failed: {}", job_id, e);
                        }
                    }
                }
            }
        }
    }

    async fn on_completed(&self, job_id: &str) {
        match self
            .store
            .update_job_status(job_id, JobStatus::Completed, None)
            .await
        {
            Ok(_) => info!("Job {} completed", job_id),
            Err(e) => error!("Failed to mark job {} as completed: {}", job_id, e),
        }
    }

    async fn on_failed(&self, job_id: &str, error_message: &str, outcome: NackOutcome) {
        match outcome {
            NackOutcome::Retrying {
                attempts_made,
                retry_at,
            } => {
                warn!(
                    "Job {} failed (attempt {}), broker retries at {}: {}",
                    job_id, attempts_made, retry_at, error_message
                );
                if let Err(e) = self
                    .store
                    .update_job_status(job_id, JobStatus::Failed, Some(error_message))
                    .await
                {
                    error!("Failed to mark job {} as failed: {}", job_id, e);
                }
                if let Err(e) = self
                    .store
                    .update_job_for_retry(job_id, error_message, retry_at)
                    .await
                {
                    error!("Failed to record retry of job {}: {}", job_id, e);
                }
            }
            NackOutcome::Exhausted { attempts_made } => {
                warn!(
                    "Job {} failed permanently after {} attempts: {}",
                    job_id, attempts_made, error_message
                );
                if let Err(e) = self.store.update_job_failed(job_id, error_message).await {
                    error!("Failed to mark job {} as failed: {}", job_id, e);
                }
            }
        }
    }

    fn take_handles(&self) -> LoopHandles {
        match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => LoopHandles::default(),
        }
    }
}

#[async_trait]
impl Dispatcher for DistributedDispatcher {
    fn mode(&self) -> BackendMode {
        BackendMode::Distributed
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        let message = BrokerMessage::for_job(job, self.backoff);
        self.broker.add(message).await?;
        debug!("Job {} submitted to broker (priority {})", job.id, job.priority);
        Ok(())
    }

    /// Stop taking deliveries, drain in-flight jobs, stop the scheduler and
    /// close the broker.
    async fn shutdown(&self) -> Result<()> {
        let handles = self.take_handles();

        self.consumer_shutdown.cancel();
        if let Some(consumer) = handles.consumer {
            if let Err(e) = consumer.await {
                error!("Consumer loop panicked: {}", e);
            }
        }

        self.in_flight.close();
        self.in_flight.wait().await;

        self.scheduler_shutdown.cancel();
        if let Some(scheduler) = handles.scheduler {
            if let Err(e) = scheduler.await {
                error!("Scheduler loop panicked: {}", e);
            }
        }

        self.broker.close().await?;
        info!("Distributed dispatcher stopped");
        Ok(())
    }
}
