use crate::error::QueueError;
use thiserror::Error;

/// Errors raised by a message broker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Connection-related errors (network, authentication, etc.)
    #[error("Broker connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Broker operation timed out
    #[error("Broker operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The broker has been closed
    #[error("Broker is closed")]
    Closed,

    /// No message is held for this job id
    #[error("Message not found: {job_id}")]
    MessageNotFound { job_id: String },

    /// Message encoding errors
    #[error("Message serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// General broker operation errors
    #[error("Broker operation failed: {operation} - {message}")]
    OperationFailed {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BrokerError {
    /// Create a connection error with a message
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with a message and source error
    pub fn connection_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn message_not_found<S: Into<String>>(job_id: S) -> Self {
        Self::MessageNotFound {
            job_id: job_id.into(),
        }
    }

    pub fn serialization_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an operation failed error
    pub fn operation_failed<S: Into<String>, T: Into<String>>(operation: S, message: T) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(feature = "redis")]
impl From<crate::connection::CommandError> for BrokerError {
    fn from(err: crate::connection::CommandError) -> Self {
        use crate::connection::CommandError;

        match err {
            CommandError::Timeout { timeout_ms } => BrokerError::Timeout { timeout_ms },
            CommandError::Redis(e) if e.is_connection_refusal() || e.is_io_error() => {
                BrokerError::connection_with_source(e.to_string(), Box::new(e))
            }
            CommandError::Redis(e) => BrokerError::OperationFailed {
                operation: "Redis command".to_string(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            },
        }
    }
}

impl From<BrokerError> for QueueError {
    fn from(err: BrokerError) -> Self {
        QueueError::BrokerError {
            message: err.to_string(),
        }
    }
}
