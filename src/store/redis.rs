use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;

use super::{JobStore, StorageError};
use crate::connection::{CommandError, RedisConnection};
use crate::core::{Job, JobStatus};

/// Give up on an update after this many lost compare-and-swap races.
const MAX_CAS_RETRIES: usize = 8;

/// Atomically replace a job record if it still holds the value we read, and
/// move it between status index sets.
///
/// Returns 1 on success, 0 if the record changed underneath us, -1 if it is gone.
const COMPARE_AND_SWAP: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return -1
    end
    if current ~= ARGV[1] then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[2])
    redis.call('SREM', KEYS[2], ARGV[3])
    redis.call('SADD', KEYS[3], ARGV[3])
    return 1
"#;

/// Create a job record and index it in one step.
///
/// Returns 1 when inserted, 0 when the id is already taken.
const INSERT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[1])
    redis.call('SADD', KEYS[2], ARGV[2])
    redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
    return 1
"#;

impl From<CommandError> for StorageError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Timeout { timeout_ms } => StorageError::timeout(timeout_ms),
            CommandError::Redis(e) => StorageError::operation_failed_with_source(
                "Redis command",
                e.to_string(),
                Box::new(e),
            ),
        }
    }
}

/// Redis job store
///
/// Each job is stored as a JSON string, with a set per status and a sorted
/// set ordering jobs by creation time for listing.
pub struct RedisJobStore {
    connection: RedisConnection,
    key_prefix: String,
}

impl RedisJobStore {
    pub fn new(connection: RedisConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
        }
    }

    /// Get the Redis key for a job
    fn job_key(&self, job_id: &str) -> String {
        format!("{}:store:job:{}", self.key_prefix, job_id)
    }

    /// Get the Redis key for a status index
    fn status_key(&self, status: JobStatus) -> String {
        format!("{}:store:status:{}", self.key_prefix, status.as_str())
    }

    /// Get the Redis key for the creation-order index
    fn order_key(&self) -> String {
        format!("{}:store:order", self.key_prefix)
    }

    fn encode(job: &Job) -> Result<String, StorageError> {
        serde_json::to_string(job).map_err(|e| {
            StorageError::serialization_with_source("Failed to serialize job", Box::new(e))
        })
    }

    fn decode(json: &str) -> Result<Job, StorageError> {
        serde_json::from_str(json).map_err(|e| {
            StorageError::serialization_with_source("Failed to deserialize job", Box::new(e))
        })
    }

    async fn get_raw(&self, job_id: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.connection.manager();
        let key = self.job_key(job_id);
        Ok(self.connection.with_timeout(conn.get(&key)).await?)
    }

    async fn load_many(&self, ids: &[String]) -> Result<Vec<Job>, StorageError> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(json) = self.get_raw(id).await? {
                jobs.push(Self::decode(&json)?);
            }
        }
        Ok(jobs)
    }

    /// Read-modify-write one job. `mutate` returns `false` to abort without
    /// writing.
    async fn modify<F>(&self, job_id: &str, mut mutate: F) -> Result<Option<Job>, StorageError>
    where
        F: FnMut(&mut Job) -> bool + Send,
    {
        let key = self.job_key(job_id);
        let script = redis::Script::new(COMPARE_AND_SWAP);

        for _ in 0..MAX_CAS_RETRIES {
            let current = self
                .get_raw(job_id)
                .await?
                .ok_or_else(|| StorageError::job_not_found(job_id))?;
            let mut job = Self::decode(&current)?;
            let old_status = job.status;

            if !mutate(&mut job) {
                return Ok(None);
            }
            let updated = Self::encode(&job)?;

            let mut invocation = script.prepare_invoke();
            invocation
                .key(&key)
                .key(self.status_key(old_status))
                .key(self.status_key(job.status))
                .arg(&current)
                .arg(&updated)
                .arg(job_id);

            let mut conn = self.connection.manager();
            let outcome: i32 = self
                .connection
                .with_timeout(invocation.invoke_async(&mut conn))
                .await?;

            match outcome {
                1 => return Ok(Some(job)),
                -1 => return Err(StorageError::job_not_found(job_id)),
                _ => continue,
            }
        }

        Err(StorageError::operation_failed(
            "update job",
            format!("lost {} concurrent update races on {}", MAX_CAS_RETRIES, job_id),
        ))
    }

    async fn modify_existing<F>(&self, job_id: &str, mut mutate: F) -> Result<Job, StorageError>
    where
        F: FnMut(&mut Job) + Send,
    {
        self.modify(job_id, |job| {
            mutate(job);
            true
        })
        .await?
        .ok_or_else(|| StorageError::job_not_found(job_id))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let json = Self::encode(job)?;
        let script = redis::Script::new(INSERT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.job_key(&job.id))
            .key(self.status_key(job.status))
            .key(self.order_key())
            .arg(json)
            .arg(&job.id)
            .arg(job.created_at.timestamp_micros());

        let mut conn = self.connection.manager();
        let inserted: i32 = self
            .connection
            .with_timeout(invocation.invoke_async(&mut conn))
            .await?;

        if inserted == 0 {
            return Err(StorageError::DuplicateJob {
                job_id: job.id.clone(),
            });
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        match self.get_raw(job_id).await? {
            Some(json) => Ok(Some(Self::decode(&json)?)),
            None => Ok(None),
        }
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StorageError> {
        self.modify_existing(job_id, |job| job.set_status(status, error))
            .await
    }

    async fn update_job_for_retry(
        &self,
        job_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<Job, StorageError> {
        self.modify_existing(job_id, |job| job.schedule_retry(error, next_run_at))
            .await
    }

    async fn update_job_failed(&self, job_id: &str, error: &str) -> Result<Job, StorageError> {
        self.modify_existing(job_id, |job| job.fail_permanently(error))
            .await
    }

    async fn reset_failed_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StorageError> {
        self.modify(job_id, |job| {
            if job.status != JobStatus::Failed {
                return false;
            }
            job.reset_for_retry(now);
            true
        })
        .await
    }

    async fn restore_failure(&self, job_id: &str, snapshot: &Job) -> Result<Job, StorageError> {
        self.modify_existing(job_id, |job| job.restore_failure(snapshot))
            .await
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StorageError> {
        let mut conn = self.connection.manager();
        let ordered: Vec<String> = self
            .connection
            .with_timeout(conn.zrange(self.order_key(), 0, -1))
            .await?;

        let ids: Vec<String> = match status {
            Some(status) => {
                let members: Vec<String> = self
                    .connection
                    .with_timeout(conn.smembers(self.status_key(status)))
                    .await?;
                let members: std::collections::HashSet<String> = members.into_iter().collect();
                ordered
                    .into_iter()
                    .filter(|id| members.contains(id))
                    .take(limit)
                    .collect()
            }
            None => ordered.into_iter().take(limit).collect(),
        };

        self.load_many(&ids).await
    }

    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Job>, StorageError> {
        let mut conn = self.connection.manager();
        let ids: Vec<String> = self
            .connection
            .with_timeout(conn.smembers(self.status_key(JobStatus::Pending)))
            .await?;

        let mut jobs: Vec<Job> = self
            .load_many(&ids)
            .await?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn job_counts(&self) -> Result<HashMap<JobStatus, usize>, StorageError> {
        let mut conn = self.connection.manager();
        let mut counts = HashMap::new();
        for status in JobStatus::ALL {
            let count: usize = self
                .connection
                .with_timeout(conn.scard(self.status_key(status)))
                .await?;
            if count > 0 {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }
}
