//! Task executor shared by both dispatchers
//!
//! Given a job's payload, the executor resolves the task it references, runs
//! it and records the outcome on the task record. It never decides whether a
//! failed job is retried; that belongs to the dispatcher that called it.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::core::{TaskKind, TaskUpdate};
use crate::error::QueueError;
use crate::store::{StorageError, TaskStore};

/// Failure reported by the external workflow executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WorkflowError {
    pub message: String,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runs scheduled workflows on behalf of the executor.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Execute the workflow with the given id to completion.
    async fn execute_workflow_by_id(&self, workflow_id: &str) -> Result<(), WorkflowError>;
}

/// Why a task execution failed.
///
/// The display text becomes the job's `last_error` and the task's `error`.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Payload missing or carrying a malformed `taskId`
    #[error("Invalid job payload: {message}")]
    InvalidPayload { message: String },

    /// The referenced task record does not exist
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// The workflow executor failed
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Reading or writing the task record failed
    #[error(transparent)]
    Store(#[from] StorageError),
}

impl From<ExecutionError> for QueueError {
    fn from(err: ExecutionError) -> Self {
        QueueError::ExecutionError {
            message: err.to_string(),
        }
    }
}

/// Extract the task id from a job payload.
///
/// Accepts a non-empty string or an integer `taskId`.
pub fn task_id_from_payload(payload: &Value) -> Result<String, ExecutionError> {
    let value = payload
        .get("taskId")
        .ok_or_else(|| ExecutionError::InvalidPayload {
            message: "missing taskId".to_string(),
        })?;

    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        other => Err(ExecutionError::InvalidPayload {
            message: format!("malformed taskId: {}", other),
        }),
    }
}

/// Executes the task behind a job.
#[derive(Clone)]
pub struct TaskExecutor {
    task_store: Arc<dyn TaskStore>,
    workflows: Arc<dyn WorkflowRunner>,
}

impl TaskExecutor {
    pub fn new(task_store: Arc<dyn TaskStore>, workflows: Arc<dyn WorkflowRunner>) -> Self {
        Self {
            task_store,
            workflows,
        }
    }

    /// Execute the task referenced by `payload`.
    ///
    /// On success the task is marked completed and its result returned. On
    /// failure the task is marked failed with the error's message and the
    /// error is returned to the caller.
    pub async fn execute(&self, job_id: &str, payload: &Value) -> Result<Value, ExecutionError> {
        let task_id = task_id_from_payload(payload)?;
        debug!("Executing task {} for job {}", task_id, job_id);

        match self.run_task(&task_id).await {
            Ok(result) => {
                info!("Task {} completed for job {}", task_id, job_id);
                Ok(result)
            }
            Err(e) => {
                error!("Task {} failed for job {}: {}", task_id, job_id, e);
                if let Err(mark_err) = self
                    .task_store
                    .update_task(&task_id, TaskUpdate::failed(e.to_string()))
                    .await
                {
                    error!("Failed to mark task {} as failed: {}", task_id, mark_err);
                }
                Err(e)
            }
        }
    }

    async fn run_task(&self, task_id: &str) -> Result<Value, ExecutionError> {
        self.task_store
            .update_task(task_id, TaskUpdate::processing())
            .await?;

        let task = self
            .task_store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let result = match &task.kind {
            TaskKind::ScheduledWorkflow { workflow_id } => {
                self.workflows.execute_workflow_by_id(workflow_id).await?;
                json!({
                    "success": true,
                    "workflowId": workflow_id,
                    "executedAt": Utc::now(),
                })
            }
            TaskKind::Generic { .. } => json!({
                "success": true,
                "message": "Task completed",
            }),
        };

        self.task_store
            .update_task(task_id, TaskUpdate::completed(result.clone()))
            .await?;
        Ok(result)
    }
}
