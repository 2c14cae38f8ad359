//! Queue configuration
//!
//! Builder-style configuration for the job queue service, with defaults
//! suitable for development and an environment loader for deployments.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::core::DEFAULT_MAX_ATTEMPTS;
use crate::error::{QueueError, Result};
use crate::processing::BackoffPolicy;

/// Shortest interval the polling loops accept; zero is raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Connection settings for the message broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Password for authentication
    pub password: Option<String>,
    /// Database number (0-15 for standard Redis)
    pub database: Option<u8>,
    /// Key prefix for all queue keys
    pub key_prefix: String,
    /// Name of the job queue
    pub queue_name: String,
    /// Timeout applied to each command
    pub command_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            database: None,
            key_prefix: "jobforge".to_string(),
            queue_name: "task-execution".to_string(),
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker host
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password for authentication
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    pub fn with_database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the key prefix
    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the queue name
    pub fn with_queue_name<S: Into<String>>(mut self, name: S) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Set command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Generate the connection URL including credentials and database
    pub fn connection_url(&self) -> String {
        let mut url = match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        };
        if let Some(db) = self.database {
            url.push('/');
            url.push_str(&db.to_string());
        }
        url
    }
}

/// Settings for the in-process polling dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneConfig {
    /// Interval between scans for due jobs
    pub poll_interval: Duration,
    /// Maximum jobs executed per scan (None = all due jobs)
    pub batch_size: Option<usize>,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: None,
        }
    }
}

impl StandaloneConfig {
    /// Set the scan interval (at least [`MIN_INTERVAL`])
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}

/// Settings for the broker-backed dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Maximum jobs executing at once
    pub concurrency: usize,
    /// Wait before polling again when the queue is empty
    pub poll_interval: Duration,
    /// Interval between promotions of due delayed retries
    pub scheduler_interval: Duration,
    /// Wait before polling again after a broker error
    pub error_backoff: Duration,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(500),
            scheduler_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl DistributedConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the delayed-retry promotion interval (at least [`MIN_INTERVAL`])
    pub fn with_scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Configuration for [`JobQueueService`](crate::JobQueueService)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Broker connection settings
    pub broker: BrokerConfig,
    /// Skip the broker probe and run standalone
    pub force_standalone: bool,
    /// Bound on connecting to and pinging the broker at startup
    pub connect_timeout: Duration,
    /// Attempt ceiling for new jobs
    pub max_attempts: u32,
    /// Delay schedule between failed attempts
    pub backoff: BackoffPolicy,
    pub standalone: StandaloneConfig,
    pub distributed: DistributedConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            force_standalone: false,
            connect_timeout: Duration::from_millis(5000),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            standalone: StandaloneConfig::default(),
            distributed: DistributedConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker connection settings
    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    /// Force standalone mode regardless of broker availability
    pub fn with_force_standalone(mut self, force: bool) -> Self {
        self.force_standalone = force;
        self
    }

    /// Set the startup connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the attempt ceiling for new jobs. Zero is raised to one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the retry backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_standalone(mut self, standalone: StandaloneConfig) -> Self {
        self.standalone = standalone;
        self
    }

    pub fn with_distributed(mut self, distributed: DistributedConfig) -> Self {
        self.distributed = distributed;
        self
    }

    /// Load configuration from environment variables
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `REDIS_HOST` | `localhost` |
    /// | `REDIS_PORT` | `6379` |
    /// | `REDIS_PASSWORD` | none |
    /// | `JOB_QUEUE_FORCE_STANDALONE` | `false` |
    /// | `JOB_QUEUE_MAX_ATTEMPTS` | `3` |
    /// | `JOB_QUEUE_BACKOFF_MS` | `5000` |
    /// | `JOB_QUEUE_POLL_INTERVAL_MS` | `5000` |
    /// | `JOB_QUEUE_CONCURRENCY` | `5` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::default();

        if let Some(host) = get("REDIS_HOST") {
            config.broker.host = host;
        }
        if let Some(port) = get("REDIS_PORT") {
            config.broker.port = parse_value("REDIS_PORT", &port)?;
        }
        config.broker.password = get("REDIS_PASSWORD");

        if let Some(force) = get("JOB_QUEUE_FORCE_STANDALONE") {
            config.force_standalone = parse_bool("JOB_QUEUE_FORCE_STANDALONE", &force)?;
        }
        if let Some(attempts) = get("JOB_QUEUE_MAX_ATTEMPTS") {
            config.max_attempts = parse_value("JOB_QUEUE_MAX_ATTEMPTS", &attempts)?;
            if config.max_attempts == 0 {
                return Err(QueueError::ConfigurationError {
                    message: "JOB_QUEUE_MAX_ATTEMPTS must be at least 1".to_string(),
                });
            }
        }
        if let Some(backoff) = get("JOB_QUEUE_BACKOFF_MS") {
            config.backoff = BackoffPolicy::exponential(parse_value("JOB_QUEUE_BACKOFF_MS", &backoff)?);
        }
        if let Some(poll) = get("JOB_QUEUE_POLL_INTERVAL_MS") {
            let millis: u64 = parse_value("JOB_QUEUE_POLL_INTERVAL_MS", &poll)?;
            config.standalone = config
                .standalone
                .with_poll_interval(Duration::from_millis(millis));
        }
        if let Some(concurrency) = get("JOB_QUEUE_CONCURRENCY") {
            config.distributed.concurrency = parse_value("JOB_QUEUE_CONCURRENCY", &concurrency)?;
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| QueueError::ConfigurationError {
        message: format!("Invalid value for {}: {} ({})", key, value, e),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(QueueError::ConfigurationError {
            message: format!("Invalid boolean value for {}: {}", key, value),
        }),
    }
}
