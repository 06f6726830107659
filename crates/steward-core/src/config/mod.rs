//! Configuration types for Steward.
//!
//! A single YAML file (`steward.yaml`) configures every component. Every
//! section is optional and falls back to its defaults, so an empty file is a
//! valid configuration.
//!
//! ```yaml
//! server:
//!   port: 8080
//! store:
//!   backend: sqlite
//!   sqlite_path: data/steward.sqlite
//! rate_limit:
//!   per_user_max: 10
//!   global_max: 50
//! engine:
//!   admin_users: ["123456"]
//! ```

pub mod audit;
pub mod classifier;
pub mod confirmation;
pub mod limits;
pub mod server;
pub mod store;
pub mod wizard;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use audit::{AuditBackend, AuditConfig};
pub use classifier::ClassifierConfig;
pub use confirmation::ConfirmationConfig;
pub use limits::RateLimitConfig;
pub use server::{DomainConfig, LoggingConfig, OutboundConfig, ServerConfig};
pub use store::{StoreBackend, StoreConfig};
pub use wizard::WizardConfig;

/// Complete Steward configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StewardConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub wizard: WizardConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub domain: DomainConfig,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Conversation engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Operators allowed to use the bot. Empty allows everyone.
    #[serde(default)]
    pub admin_users: Vec<String>,
}

impl EngineConfig {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.is_empty() || self.admin_users.iter().any(|u| u == user_id)
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StewardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Config(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }
        if self.confirmation.ttl_secs <= 0 {
            return Err(ConfigError::Config(
                "confirmation.ttl_secs must be positive".to_string(),
            ));
        }
        if self.classifier.max_attempts == 0 {
            return Err(ConfigError::Config(
                "classifier.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.audit.page_cap == 0 {
            return Err(ConfigError::Config(
                "audit.page_cap must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
