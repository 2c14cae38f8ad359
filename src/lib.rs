//! # jobforge
//!
//! A durable job queue with at-least-once delivery, exponential-backoff
//! retry and two dispatch backends.
//!
//! **jobforge** runs the tasks of a surrounding application in the
//! background. Every job is recorded in a job store; a dispatcher decides when
//! the job runs and mirrors each outcome back into the store, so the store is
//! always the place to ask "what happened to this job".
//!
//! ## 🚀 **Features**
//!
//! - **Distributed mode**: a Redis-backed broker with priorities, delayed
//!   retries and bounded concurrent consumption
//! - **Standalone mode**: an in-process poller over the job store, with the
//!   same retry policy, for environments without a broker
//! - **Automatic fallback**: the broker is probed once at startup; if it cannot
//!   be reached within the connect timeout the service runs standalone
//! - **Manual retry**: failed jobs can be reset and resubmitted ahead of
//!   regular traffic
//!
//! ## 🔄 **Job Lifecycle**
//!
//! ```text
//! pending → processing → completed
//!    ↑          ↓
//!    └──── (retry with backoff)
//!               ↓
//!            failed ──(manual retry)──→ pending
//! ```
//!
//! A failure with attempts remaining puts the job back to `pending` with
//! `next_run_at = now + base * 2^attempts`. The failure that brings
//! `attempts` up to `max_attempts` is terminal.
//!
//! ```rust
//! use jobforge::{Job, JobStatus, Priority};
//!
//! let mut job = Job::new("task-1", Priority::DEFAULT, 3);
//! assert_eq!(job.status, JobStatus::Pending);
//!
//! job.fail_permanently("boom");
//! assert_eq!(job.status, JobStatus::Failed);
//! assert_eq!(job.last_error.as_deref(), Some("boom"));
//! ```
//!
//! ## ⚡ **Running the Queue**
//!
//! ```rust
//! use jobforge::{
//!     JobQueueService, MemoryTaskStore, QueueConfig, TaskRecord, WorkflowError, WorkflowRunner,
//! };
//! use std::sync::Arc;
//!
//! struct Workflows;
//!
//! #[async_trait::async_trait]
//! impl WorkflowRunner for Workflows {
//!     async fn execute_workflow_by_id(&self, workflow_id: &str) -> Result<(), WorkflowError> {
//!         println!("running workflow {}", workflow_id);
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let tasks = Arc::new(MemoryTaskStore::new());
//! tasks.insert_task(TaskRecord::scheduled_workflow("t1", "nightly-report")).unwrap();
//!
//! // REDIS_HOST, REDIS_PORT and JOB_QUEUE_* override the defaults.
//! let config = QueueConfig::from_env().unwrap().with_force_standalone(true);
//! let service = JobQueueService::start(config, tasks, Arc::new(Workflows)).await;
//!
//! let job_id = service.enqueue_job("t1", None).await.unwrap();
//! println!("queued {} in {} mode", job_id, service.mode());
//!
//! service.shutdown().await.unwrap();
//! # });
//! ```
//!
//! ## 🔧 **Error Handling**
//!
//! ```rust
//! use jobforge::{QueueError, Result};
//!
//! fn report(result: Result<String>) {
//!     match result {
//!         Ok(job_id) => println!("enqueued {}", job_id),
//!         Err(QueueError::StorageError { message }) => println!("store failed: {}", message),
//!         Err(QueueError::ShutDown) => println!("queue is shutting down"),
//!         Err(e) => println!("other error: {}", e),
//!     }
//! }
//! ```
//!
//! ## 🧩 **Feature Flags**
//!
//! - `redis` (default): the Redis broker and job store. Without it the
//!   service always runs standalone.

pub mod backend;
pub mod broker;
pub mod config;
#[cfg(feature = "redis")]
pub mod connection;
pub mod core;
pub mod error;
pub mod processing;
pub mod service;
pub mod store;

// Re-export main types for convenience
pub use backend::{BackendMode, BackendSelection, BackendSelector, DistributedParts};
pub use broker::{Broker, BrokerError, BrokerMessage, Delivery, MemoryBroker, NackOutcome};
pub use config::{BrokerConfig, DistributedConfig, QueueConfig, StandaloneConfig};
pub use core::{Job, JobStatus, Priority, TaskKind, TaskRecord, TaskStatus, TaskUpdate};
pub use error::{QueueError, Result};
pub use processing::{
    BackoffPolicy, Dispatcher, DistributedDispatcher, ExecutionError, StandaloneDispatcher,
    TaskExecutor, WorkflowError, WorkflowRunner,
};
pub use service::JobQueueService;
pub use store::{JobStore, MemoryJobStore, MemoryTaskStore, StorageError, TaskStore};

#[cfg(feature = "redis")]
pub use broker::RedisBroker;
#[cfg(feature = "redis")]
pub use connection::RedisConnection;
#[cfg(feature = "redis")]
pub use store::RedisJobStore;
