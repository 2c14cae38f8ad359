//! Backend selection
//!
//! At startup the selector probes the broker once, bounded by the configured
//! connect timeout. Any failure is logged and the process falls back to
//! standalone mode for its whole lifetime; the choice is never revisited.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerError};
use crate::config::QueueConfig;
use crate::core::Job;
use crate::error::Result;
use crate::processing::{Dispatcher, DistributedDispatcher, StandaloneDispatcher};
use crate::store::JobStore;

/// The committed execution backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMode {
    Distributed,
    Standalone,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Distributed => write!(f, "distributed"),
            BackendMode::Standalone => write!(f, "standalone"),
        }
    }
}

/// Broker and job store reached through a live broker connection
pub struct DistributedParts {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn JobStore>,
}

/// Outcome of backend selection
pub enum BackendSelection {
    Distributed(DistributedParts),
    Standalone {
        /// Why the broker was not used
        reason: String,
    },
}

impl BackendSelection {
    pub fn mode(&self) -> BackendMode {
        match self {
            BackendSelection::Distributed(_) => BackendMode::Distributed,
            BackendSelection::Standalone { .. } => BackendMode::Standalone,
        }
    }
}

/// Decides once, at startup, which backend the process runs.
pub struct BackendSelector<'a> {
    config: &'a QueueConfig,
}

impl<'a> BackendSelector<'a> {
    pub fn new(config: &'a QueueConfig) -> Self {
        Self { config }
    }

    /// Probe the configured broker and pick a backend.
    #[cfg(feature = "redis")]
    pub async fn select(&self) -> BackendSelection {
        let config = self.config;
        self.select_with(|| connect_redis(config)).await
    }

    /// Probe the configured broker and pick a backend.
    #[cfg(not(feature = "redis"))]
    pub async fn select(&self) -> BackendSelection {
        if let Some(selection) = self.forced() {
            return selection;
        }
        let reason = "broker support not compiled in".to_string();
        warn!("Job queue running in standalone mode: {}", reason);
        BackendSelection::Standalone { reason }
    }

    /// Pick a backend using `connect` to reach the broker.
    ///
    /// Connecting and the liveness probe together must finish within the
    /// configured connect timeout.
    pub async fn select_with<F, Fut>(&self, connect: F) -> BackendSelection
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<DistributedParts, BrokerError>>,
    {
        if let Some(selection) = self.forced() {
            return selection;
        }

        let probe = async {
            let parts = connect().await?;
            parts.broker.ping().await?;
            Ok::<_, BrokerError>(parts)
        };

        let failure = match timeout(self.config.connect_timeout, probe).await {
            Ok(Ok(parts)) => {
                info!(
                    "Job queue running in distributed mode ({}:{})",
                    self.config.broker.host, self.config.broker.port
                );
                return BackendSelection::Distributed(parts);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "broker did not respond within {}ms",
                self.config.connect_timeout.as_millis()
            ),
        };

        warn!(
            "Broker unavailable, falling back to standalone mode: {}",
            failure
        );
        BackendSelection::Standalone { reason: failure }
    }

    fn forced(&self) -> Option<BackendSelection> {
        if self.config.force_standalone {
            info!("Standalone mode forced by configuration");
            Some(BackendSelection::Standalone {
                reason: "forced by configuration".to_string(),
            })
        } else {
            None
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &QueueConfig) -> std::result::Result<DistributedParts, BrokerError> {
    use crate::broker::RedisBroker;
    use crate::connection::RedisConnection;
    use crate::store::RedisJobStore;

    let connection = RedisConnection::connect(&config.broker, config.connect_timeout).await?;
    let broker = RedisBroker::new(
        connection.clone(),
        &config.broker.key_prefix,
        &config.broker.queue_name,
    );
    let store = RedisJobStore::new(connection, config.broker.key_prefix.clone());

    Ok(DistributedParts {
        broker: Arc::new(broker),
        store: Arc::new(store),
    })
}

/// The running backend, one dispatcher per variant.
pub enum Backend {
    Distributed(Arc<DistributedDispatcher>),
    Standalone(Arc<StandaloneDispatcher>),
}

impl Backend {
    fn dispatcher(&self) -> &dyn Dispatcher {
        match self {
            Backend::Distributed(dispatcher) => &**dispatcher,
            Backend::Standalone(dispatcher) => &**dispatcher,
        }
    }
}

#[async_trait]
impl Dispatcher for Backend {
    fn mode(&self) -> BackendMode {
        self.dispatcher().mode()
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.dispatcher().enqueue(job).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.dispatcher().shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::store::MemoryJobStore;
    use std::time::Duration;

    fn parts() -> DistributedParts {
        DistributedParts {
            broker: Arc::new(MemoryBroker::new()),
            store: Arc::new(MemoryJobStore::new()),
        }
    }

    #[tokio::test]
    async fn test_force_flag_skips_probe() {
        let config = QueueConfig::default().with_force_standalone(true);
        let selection = BackendSelector::new(&config)
            .select_with(|| async { Ok(parts()) })
            .await;
        assert_eq!(selection.mode(), BackendMode::Standalone);
    }

    #[tokio::test]
    async fn test_live_broker_selects_distributed() {
        let config = QueueConfig::default();
        let selection = BackendSelector::new(&config)
            .select_with(|| async { Ok(parts()) })
            .await;
        assert_eq!(selection.mode(), BackendMode::Distributed);
    }

    #[tokio::test]
    async fn test_connect_error_falls_back() {
        let config = QueueConfig::default();
        let selection = BackendSelector::new(&config)
            .select_with(|| async { Err(BrokerError::connection("connection refused")) })
            .await;
        match selection {
            BackendSelection::Standalone { reason } => assert!(reason.contains("refused")),
            BackendSelection::Distributed(_) => panic!("expected standalone"),
        }
    }

    #[tokio::test]
    async fn test_failed_ping_falls_back() {
        let config = QueueConfig::default();
        let selection = BackendSelector::new(&config)
            .select_with(|| async {
                let broker = MemoryBroker::new();
                broker.close().await?;
                Ok::<_, BrokerError>(DistributedParts {
                    broker: Arc::new(broker),
                    store: Arc::new(MemoryJobStore::new()),
                })
            })
            .await;
        assert_eq!(selection.mode(), BackendMode::Standalone);
    }

    #[tokio::test]
    async fn test_slow_broker_times_out() {
        let config = QueueConfig::default().with_connect_timeout(Duration::from_millis(20));
        let selection = BackendSelector::new(&config)
            .select_with(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(parts())
            })
            .await;
        match selection {
            BackendSelection::Standalone { reason } => assert!(reason.contains("20ms")),
            BackendSelection::Distributed(_) => panic!("expected standalone"),
        }
    }
}
