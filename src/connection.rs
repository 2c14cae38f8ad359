//! Shared Redis connection used by the broker and the job store.

use redis::{aio::ConnectionManager, Client, RedisError, RedisResult};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::BrokerConfig;

/// Failure of a single Redis command.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Redis(#[from] RedisError),
}

/// A multiplexed Redis connection with per-command timeouts.
///
/// Cloning is cheap; all clones share the underlying connection.
#[derive(Clone)]
pub struct RedisConnection {
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisConnection {
    /// Open a connection, giving up after `connect_timeout`.
    pub async fn connect(
        config: &BrokerConfig,
        connect_timeout: Duration,
    ) -> Result<Self, CommandError> {
        let client = Client::open(config.connection_url())?;

        let manager = timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CommandError::Timeout {
                timeout_ms: connect_timeout.as_millis() as u64,
            })??;

        Ok(Self {
            manager,
            command_timeout: config.command_timeout,
        })
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), CommandError> {
        let mut conn = self.manager();
        let _pong: String = self
            .with_timeout(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    /// A handle for issuing commands.
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Execute a Redis command with timeout
    pub async fn with_timeout<F, T>(&self, operation: F) -> Result<T, CommandError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        timeout(self.command_timeout, operation)
            .await
            .map_err(|_| CommandError::Timeout {
                timeout_ms: self.command_timeout.as_millis() as u64,
            })?
            .map_err(CommandError::from)
    }
}
