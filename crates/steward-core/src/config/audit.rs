//! Audit logging configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the audit/usage logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Storage backend.
    #[serde(default)]
    pub backend: AuditBackend,

    /// Directory for file-based audit logs.
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Also mirror entries to stdout.
    #[serde(default)]
    pub stdout: bool,

    /// Retention period in days used by the maintenance sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum number of entries a single query returns.
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,
}

/// Audit storage backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    /// Entries live in the durable key-value store.
    #[default]
    Store,
    /// JSON Lines file in `directory`.
    File,
    /// Stdout only (not queryable).
    Console,
    /// Discard everything.
    None,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            backend: AuditBackend::default(),
            directory: default_directory(),
            stdout: false,
            retention_days: default_retention_days(),
            page_cap: default_page_cap(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> String {
    "logs".to_string()
}

fn default_retention_days() -> u32 {
    90
}

fn default_page_cap() -> usize {
    100
}
