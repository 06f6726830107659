//! Transport and outbound boundary configuration.

use serde::{Deserialize, Serialize};

/// Webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment variable holding the shared webhook secret. Unset or empty
    /// variable disables the check.
    #[serde(default = "default_secret_env")]
    pub webhook_secret_env: String,

    /// Run the maintenance sweep in-process every N seconds.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret_env: default_secret_env(),
            sweep_interval_secs: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Domain service (orders/products/media backend) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default = "default_domain_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            base_url: default_domain_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Outbound reply delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Base URL of the chat API; `None` means replies are only returned in
    /// the webhook response body.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Process logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON log lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_secret_env() -> String {
    "STEWARD_WEBHOOK_SECRET".to_string()
}

fn default_domain_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_filter() -> String {
    "info".to_string()
}
