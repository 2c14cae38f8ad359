use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use super::{JobStore, StorageError};
use crate::core::{Job, JobStatus};

/// Jobs in insertion order plus an id index.
#[derive(Debug, Default)]
struct JobTable {
    order: Vec<String>,
    jobs: HashMap<String, Job>,
}

impl JobTable {
    fn iter_ordered(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }
}

/// In-memory job store
///
/// Keeps every job in insertion order behind a `RwLock`. In standalone mode
/// this store is also the dispatch list: the polling dispatcher scans it for
/// due jobs, so there is no second copy that could diverge.
///
/// Records are never evicted; retention is the caller's concern.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    table: RwLock<JobTable>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of jobs currently stored
    pub fn len(&self) -> usize {
        self.read().map(|table| table.jobs.len()).unwrap_or(0)
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, JobTable>, StorageError> {
        self.table
            .read()
            .map_err(|e| StorageError::operation_failed("read lock", e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, JobTable>, StorageError> {
        self.table
            .write()
            .map_err(|e| StorageError::operation_failed("write lock", e.to_string()))
    }

    /// Apply `mutate` to one job under the write lock and return the result.
    fn modify<F>(&self, job_id: &str, mutate: F) -> Result<Job, StorageError>
    where
        F: FnOnce(&mut Job),
    {
        let mut table = self.write()?;
        let job = table
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::job_not_found(job_id))?;
        mutate(job);
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let mut table = self.write()?;
        if table.jobs.contains_key(&job.id) {
            return Err(StorageError::DuplicateJob {
                job_id: job.id.clone(),
            });
        }
        table.order.push(job.id.clone());
        table.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        Ok(self.read()?.jobs.get(job_id).cloned())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StorageError> {
        self.modify(job_id, |job| {
            if !job.status.can_transition_to(status) {
                warn!(
                    job_id = %job.id,
                    from = %job.status,
                    to = %status,
                    "Unexpected job status transition"
                );
            }
            job.set_status(status, error);
        })
    }

    async fn update_job_for_retry(
        &self,
        job_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<Job, StorageError> {
        self.modify(job_id, |job| job.schedule_retry(error, next_run_at))
    }

    async fn update_job_failed(&self, job_id: &str, error: &str) -> Result<Job, StorageError> {
        self.modify(job_id, |job| job.fail_permanently(error))
    }

    async fn reset_failed_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StorageError> {
        let mut table = self.write()?;
        let job = table
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::job_not_found(job_id))?;

        if job.status != JobStatus::Failed {
            return Ok(None);
        }
        job.reset_for_retry(now);
        Ok(Some(job.clone()))
    }

    async fn restore_failure(&self, job_id: &str, snapshot: &Job) -> Result<Job, StorageError> {
        self.modify(job_id, |job| job.restore_failure(snapshot))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StorageError> {
        let table = self.read()?;
        Ok(table
            .iter_ordered()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Job>, StorageError> {
        let table = self.read()?;
        Ok(table
            .iter_ordered()
            .filter(|job| job.is_due(now))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn job_counts(&self) -> Result<HashMap<JobStatus, usize>, StorageError> {
        let table = self.read()?;
        let mut counts = HashMap::new();
        for job in table.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
