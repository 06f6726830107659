//! Durable store configuration.

use serde::{Deserialize, Serialize};

/// Where correctness-critical state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database file (sqlite backend).
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Bound on a single store operation, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Store backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory. Only suitable for a single long-lived process.
    Memory,
    /// SQLite file.
    #[default]
    Sqlite,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            sqlite_path: default_sqlite_path(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_sqlite_path() -> String {
    "data/steward.sqlite".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}
