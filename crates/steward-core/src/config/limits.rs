//! Rate limiting configuration.

use serde::{Deserialize, Serialize};

/// Fixed-window limits protecting the shared completion quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per user per window.
    #[serde(default = "default_per_user_max")]
    pub per_user_max: u32,

    /// Maximum requests across all users per window.
    #[serde(default = "default_global_max")]
    pub global_max: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How long an expired per-user window is kept before the sweep evicts it.
    #[serde(default = "default_idle_grace_secs")]
    pub idle_grace_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_user_max: default_per_user_max(),
            global_max: default_global_max(),
            window_secs: default_window_secs(),
            idle_grace_secs: default_idle_grace_secs(),
        }
    }
}

fn default_per_user_max() -> u32 {
    10
}

fn default_global_max() -> u32 {
    50
}

fn default_window_secs() -> u64 {
    60
}

fn default_idle_grace_secs() -> u64 {
    300
}
