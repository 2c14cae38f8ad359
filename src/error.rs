//! Error types for jobforge.
//!
//! This module provides the crate-level error used by the job lifecycle API,
//! using the thiserror crate for ergonomic error handling. Layer-specific
//! errors ([`StorageError`], [`BrokerError`], [`ExecutionError`]) convert into
//! it.
//!
//! [`StorageError`]: crate::store::StorageError
//! [`BrokerError`]: crate::broker::BrokerError
//! [`ExecutionError`]: crate::processing::ExecutionError

use thiserror::Error;

/// The main error type for jobforge operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Job not found error
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Serialization/deserialization errors
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    /// Job store errors
    #[error("Storage error: {message}")]
    StorageError { message: String },

    /// Broker errors
    #[error("Broker error: {message}")]
    BrokerError { message: String },

    /// Task execution errors
    #[error("Execution error: {message}")]
    ExecutionError { message: String },

    /// Invalid job data
    #[error("Invalid job data: {message}")]
    InvalidJobData { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// The service was shut down
    #[error("Job queue is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError {
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for jobforge operations.
pub type Result<T> = std::result::Result<T, QueueError>;
