//! Job status management.
//!
//! This module defines the statuses a job moves through during one attempt
//! series, and which moves between them are legal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QueueError;

/// Status of a job as recorded in the job store.
///
/// Within one attempt the status only moves forward:
///
/// ```text
/// Pending → Processing → Completed
///               ↓
///           Pending (retry) / Failed
/// ```
///
/// `Completed` and `Failed` are terminal until a manual retry resets the job
/// back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be dispatched (first run or scheduled retry)
    Pending,
    /// Handed to the task executor
    Processing,
    /// Finished successfully
    Completed,
    /// Failed; terminal once the attempt budget is spent
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Returns the lowercase name used in storage keys and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Checks if the status ends an attempt series.
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Checks if a dispatcher may move a job from this status to `target`.
    ///
    /// `Failed → Pending` is the manual retry path; `Processing → Failed →
    /// Pending` is how a broker-scheduled retry is mirrored.
    pub fn can_transition_to(self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Pending, Processing) => true,
            // Direct failure for jobs whose payload never reached the executor
            (Pending, Failed) => true,

            (Processing, Completed) => true,
            (Processing, Pending) => true,
            (Processing, Failed) => true,

            (Failed, Pending) => true,

            // Redelivery of a message that was already picked up
            (Processing, Processing) => true,

            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(QueueError::InvalidJobData {
                message: format!("unknown job status: {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));

        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert_eq!(
            "pending".parse::<JobStatus>().unwrap(),
            JobStatus::Pending
        );
        assert!("retrying".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
