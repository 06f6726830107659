//! Confirmation gate configuration.

use serde::{Deserialize, Serialize};

/// Two-phase confirmation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Lifetime of a pending confirmation in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,

    /// Replies that confirm a pending action (case-insensitive, trimmed).
    #[serde(default = "default_affirmative")]
    pub affirmative: Vec<String>,

    /// Replies that abort a pending action.
    #[serde(default = "default_negative")]
    pub negative: Vec<String>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            affirmative: default_affirmative(),
            negative: default_negative(),
        }
    }
}

fn default_ttl_secs() -> i64 {
    60
}

fn default_affirmative() -> Vec<String> {
    ["yes", "y", "ok", "confirm", "да", "sí", "oui"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_negative() -> Vec<String> {
    ["no", "n", "abort", "cancel", "/cancel", "нет", "non"]
        .into_iter()
        .map(String::from)
        .collect()
}
