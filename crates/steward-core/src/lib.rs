//! # steward-core
//!
//! Types shared by every Steward crate: the inbound event and outbound reply
//! shapes of the chat transport, the classified [`Intent`], action categories,
//! the [`Clock`] used for every TTL and window computation, and the YAML
//! configuration tree.

pub mod clock;
pub mod config;
pub mod event;
pub mod intent;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    AuditBackend, AuditConfig, ClassifierConfig, ConfigError, ConfirmationConfig, DomainConfig,
    EngineConfig, LoggingConfig, OutboundConfig, RateLimitConfig, ServerConfig, StewardConfig,
    StoreBackend, StoreConfig, WizardConfig,
};
pub use event::{Button, EventKind, InboundEvent, Reply, TextFormat};
pub use intent::{ActionCategory, Intent, UNKNOWN_ACTION};
