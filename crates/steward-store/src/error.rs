//! Error types for the store crate.

use thiserror::Error;

/// Errors returned by a [`KeyValueStore`](crate::KeyValueStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-swap write lost against a concurrent writer.
    #[error("version conflict on key {key}")]
    Conflict { key: String },

    /// The operation did not finish within its bound.
    #[error("store operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock poisoned or other backend failure.
    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
