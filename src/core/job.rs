//! Job definition and management.
//!
//! This module contains the core [`Job`] record: one scheduled execution
//! attempt-series for a task, as tracked by the job store.
//!
//! ## Examples
//!
//! ```rust
//! use jobforge::{Job, JobStatus, Priority};
//!
//! let job = Job::new("task-42", Priority::DEFAULT, 3);
//!
//! assert_eq!(job.status, JobStatus::Pending);
//! assert_eq!(job.attempts, 0);
//! assert_eq!(job.task_id(), Some("task-42"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

use crate::core::JobStatus;
use crate::error::{QueueError, Result};

/// Default number of execution attempts before a failure becomes terminal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Dispatch priority of a job. Lower numbers are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// Band used for manual retries; served ahead of everything else.
    pub const MANUAL_RETRY: Priority = Priority(0);
    /// Priority used when the caller does not pick one.
    pub const DEFAULT: Priority = Priority(1);

    /// Returns the raw numeric value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work tracked by the job store.
///
/// The job's `id` is generated at enqueue time and is the idempotency key
/// shared by the store, the broker and the standalone list. The payload
/// carries at least a `taskId` referencing the domain task to execute.
///
/// ## Fields
///
/// - **`id`**: Unique identifier (UUID v4)
/// - **`task_id`**: Opaque reference to the task this job runs
/// - **`status`**: Current [`JobStatus`]
/// - **`attempts`**: Failed executions so far
/// - **`max_attempts`**: Attempt ceiling; reaching it on a failure is terminal
/// - **`next_run_at`**: The job must not be dispatched before this instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier for the job (UUID format)
    pub id: String,

    /// Domain task reference, opaque to the queue
    pub task_id: String,

    /// Current status
    pub status: JobStatus,

    /// Dispatch priority (lower is sooner)
    pub priority: Priority,

    /// Number of failed executions so far
    pub attempts: u32,

    /// Failures allowed before the job is terminally failed
    pub max_attempts: u32,

    /// Most recent failure message
    pub last_error: Option<String>,

    /// Earliest instant the job may be dispatched
    pub next_run_at: DateTime<Utc>,

    /// Data handed to the task executor
    pub payload: Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job for `task_id`, due immediately.
    pub fn new(task_id: impl Into<String>, priority: Priority, max_attempts: u32) -> Self {
        let task_id = task_id.into();
        let payload = json!({ "taskId": task_id });
        Self::with_payload(task_id, payload, priority, max_attempts)
    }

    /// Creates a pending job carrying an explicit executor payload.
    ///
    /// The payload is stored as-is; its shape is validated by the task
    /// executor when the job runs, not here. A `max_attempts` of zero is
    /// raised to one.
    pub fn with_payload(
        task_id: impl Into<String>,
        payload: Value,
        priority: Priority,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            next_run_at: now,
            payload,
            created_at: now,
            updated_at: now,
            last_run_at: None,
        }
    }

    /// Returns the `taskId` embedded in the payload, if present and a string.
    pub fn task_id(&self) -> Option<&str> {
        self.payload.get("taskId").and_then(Value::as_str)
    }

    /// True when the payload gives the executor nothing to work on
    /// (`null` or `{}`).
    pub fn has_empty_payload(&self) -> bool {
        is_empty_payload(&self.payload)
    }

    /// Checks if the standalone dispatcher may pick this job up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_run_at <= now
    }

    /// Checks if the attempt budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Unconditionally sets the status, stamping `updated_at` and, when the
    /// job enters `Processing`, `last_run_at`.
    pub fn set_status(&mut self, status: JobStatus, error: Option<&str>) {
        let now = Utc::now();
        self.status = status;
        if let Some(error) = error {
            self.last_error = Some(error.to_string());
        }
        if status == JobStatus::Processing {
            self.last_run_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Records a failure that will be retried at `next_run_at`.
    pub fn schedule_retry(&mut self, error: &str, next_run_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.next_run_at = next_run_at;
        self.updated_at = Utc::now();
    }

    /// Records the failure that spends the attempt budget.
    pub fn fail_permanently(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.attempts = self.attempts.saturating_add(1).min(self.max_attempts);
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    /// Resets a failed job for a manual retry, due at `now`.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.next_run_at = now;
        self.updated_at = now;
    }

    /// Puts back the failure bookkeeping of `snapshot`, undoing a reset
    /// whose resubmission never reached the backend.
    pub fn restore_failure(&mut self, snapshot: &Job) {
        self.status = snapshot.status;
        self.attempts = snapshot.attempts;
        self.last_error = snapshot.last_error.clone();
        self.next_run_at = snapshot.next_run_at;
        self.updated_at = Utc::now();
    }

    /// Serializes the job to a JSON string for storage.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to serialize job: {}", e),
        })
    }

    /// Deserializes a job from a JSON string.
    pub fn deserialize(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to deserialize job: {}", e),
        })
    }
}

pub(crate) fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
