//! Intent classifier configuration.

use serde::{Deserialize, Serialize};

/// Settings for the completion-backed intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Chat-completions endpoint (OpenAI-compatible).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff base; attempt `n` waits `n * backoff_ms` before retrying.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            temperature: 0.0,
        }
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "STEWARD_COMPLETION_API_KEY".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}
