//! Wizard configuration.

use serde::{Deserialize, Serialize};

/// Settings for multi-step guided flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardConfig {
    /// Upper bound on photos collected by the photo loop.
    #[serde(default = "default_max_photos")]
    pub max_photos: usize,

    /// Replies that end a collection loop.
    #[serde(default = "default_done_tokens")]
    pub done_tokens: Vec<String>,

    /// Replies that skip an optional step.
    #[serde(default = "default_skip_tokens")]
    pub skip_tokens: Vec<String>,

    /// Replies that cancel the wizard at any step.
    #[serde(default = "default_cancel_tokens")]
    pub cancel_tokens: Vec<String>,

    /// Keep a per-process read-through cache of conversation state. It only
    /// answers presence checks; turns always read the store.
    #[serde(default = "default_cache")]
    pub cache: bool,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            max_photos: default_max_photos(),
            done_tokens: default_done_tokens(),
            skip_tokens: default_skip_tokens(),
            cancel_tokens: default_cancel_tokens(),
            cache: default_cache(),
        }
    }
}

fn default_max_photos() -> usize {
    10
}

fn default_done_tokens() -> Vec<String> {
    vec!["done".to_string(), "/done".to_string()]
}

fn default_skip_tokens() -> Vec<String> {
    vec!["skip".to_string(), "/skip".to_string()]
}

fn default_cancel_tokens() -> Vec<String> {
    vec!["cancel".to_string(), "/cancel".to_string()]
}

fn default_cache() -> bool {
    false
}
