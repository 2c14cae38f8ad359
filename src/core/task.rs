//! Task records.
//!
//! A task is the domain work a job executes. The queue treats it as opaque
//! apart from two things: the executor marks its status, and a
//! scheduled-workflow task is delegated to the workflow runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        })
    }
}

/// What kind of work a task represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// A scheduled invocation of a stored workflow
    ScheduledWorkflow {
        #[serde(rename = "workflowId")]
        workflow_id: String,
    },
    /// Any other task; completes with a generic result
    Generic { name: String },
}

/// A task record as seen by the task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Free-form result written on completion
    pub result: Option<Value>,
    /// Failure message written on failure
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a pending task record.
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a generic task record.
    pub fn generic(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Generic { name: name.into() })
    }

    /// Creates a scheduled-workflow task record.
    pub fn scheduled_workflow(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self::new(
            id,
            TaskKind::ScheduledWorkflow {
                workflow_id: workflow_id.into(),
            },
        )
    }
}

/// A status write against a task record.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn processing() -> Self {
        Self {
            status: TaskStatus::Processing,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Applies the update to a record.
    pub fn apply(&self, record: &mut TaskRecord) {
        record.status = self.status;
        if let Some(result) = &self.result {
            record.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            record.error = Some(error.clone());
        }
        record.updated_at = Utc::now();
    }
}
