//! Error types for the audit crate.

use steward_store::StoreError;
use thiserror::Error;

/// Errors that can occur during audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to initialize the audit logger.
    #[error("failed to initialize audit logger: {0}")]
    InitializationFailed(String),

    /// Failed to query audit entries.
    #[error("failed to query audit entries: {0}")]
    QueryFailed(String),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
