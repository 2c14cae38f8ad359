//! Message broker capability
//!
//! In distributed mode a broker holds the execution schedule: a priority
//! ordered waiting set, a delayed set for backoff retries, the messages a
//! worker has reserved, and the messages whose attempt budget is spent. The
//! job store stays the source of truth for job status; the broker only
//! decides *when* a job is delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::job::is_empty_payload;
use crate::core::{Job, Priority};
use crate::processing::BackoffPolicy;

pub mod error;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use error::BrokerError;
pub use memory::{BrokerCounts, MemoryBroker};
#[cfg(feature = "redis")]
pub use redis::RedisBroker;

/// Message name used for task execution jobs.
pub const EXECUTE_TASK: &str = "execute-task";

/// A job as submitted to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMessage {
    /// Job id; a broker holds at most one message per id
    pub job_id: String,
    pub name: String,
    pub payload: Value,
    /// Lower is delivered sooner
    pub priority: Priority,
    /// Total deliveries allowed before the message is parked as failed
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl BrokerMessage {
    /// Build the message for a job, using the job's own attempt ceiling.
    pub fn for_job(job: &Job, backoff: BackoffPolicy) -> Self {
        Self {
            job_id: job.id.clone(),
            name: EXECUTE_TASK.to_string(),
            payload: job.payload.clone(),
            priority: job.priority,
            attempts: job.max_attempts,
            backoff,
        }
    }

    /// True when there is nothing for the executor to work on.
    pub fn has_empty_payload(&self) -> bool {
        is_empty_payload(&self.payload)
    }
}

/// A reserved message handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: BrokerMessage,
    /// Failed deliveries of this message so far
    pub attempts_made: u32,
}

/// What the broker did with a negatively acknowledged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Parked in the delayed set until `retry_at`
    Retrying {
        attempts_made: u32,
        retry_at: DateTime<Utc>,
    },
    /// Attempt budget spent; parked in the failed set
    Exhausted { attempts_made: u32 },
}

/// The operations a dispatcher needs from a broker.
///
/// Delivery is at-least-once: a reserved message stays reserved until it is
/// acked or nacked.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Submit a message to the waiting set.
    ///
    /// Re-adding an id replaces the stored message and resets its attempt
    /// counter, taking it out of the delayed and failed sets.
    async fn add(&self, message: BrokerMessage) -> Result<(), BrokerError>;

    /// Move delayed messages due at `now` back to the waiting set.
    /// Returns how many were promoted.
    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<usize, BrokerError>;

    /// Reserve the highest-priority waiting message, if any.
    async fn reserve(&self) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge successful processing; the message is dropped.
    async fn ack(&self, job_id: &str) -> Result<(), BrokerError>;

    /// Report a failed delivery. The broker schedules a delayed retry using
    /// the message's backoff policy unless the attempt budget is spent.
    async fn nack(&self, job_id: &str, error: &str) -> Result<NackOutcome, BrokerError>;

    /// Stop accepting operations and release the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Decide the fate of a message that has just failed for the
/// `attempts_made`-th time.
pub(crate) fn nack_outcome(
    message: &BrokerMessage,
    attempts_made: u32,
    now: DateTime<Utc>,
) -> NackOutcome {
    if attempts_made < message.attempts {
        NackOutcome::Retrying {
            attempts_made,
            retry_at: message.backoff.next_run_at(attempts_made, now),
        }
    } else {
        NackOutcome::Exhausted { attempts_made }
    }
}
