use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{StorageError, TaskStore};
use crate::core::{TaskRecord, TaskUpdate};

/// In-memory task store
///
/// Stand-in for the application's task relation, used in tests and by
/// embedders without a database.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task record
    pub fn insert_task(&self, task: TaskRecord) -> Result<(), StorageError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StorageError::operation_failed("write lock", e.to_string()))?;
        tasks.insert(task.id.clone(), task);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StorageError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StorageError::operation_failed("read lock", e.to_string()))?;
        Ok(tasks.get(task_id).cloned())
    }

    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<bool, StorageError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StorageError::operation_failed("write lock", e.to_string()))?;
        match tasks.get_mut(task_id) {
            Some(record) => {
                update.apply(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
