//! # steward-audit
//!
//! Append-only audit and usage log for the Steward command engine.
//!
//! Every action attempt and outcome, confirmation gate decision, wizard
//! transition, classification attempt and gatekeeping denial is written as an
//! [`AuditEntry`]. Entries are never updated; only the retention sweep
//! deletes them.
//!
//! ## Features
//!
//! - **Builder API** for entries with optional context fields
//! - **Pluggable storage**: durable store, JSON Lines file, console, null
//! - **Query** by user, action substring, category, kind and time range
//! - **Aggregation** into [`UsageStats`] by scanning entries
//!
//! ## Example
//!
//! ```ignore
//! use steward_audit::{AuditLogger, AuditFilter};
//!
//! logger.log_action_succeeded("42", "list_orders", ActionCategory::Order, 12, "turn-1").await;
//! let recent = logger.query(AuditFilter { user_id: Some("42".into()), ..Default::default() }).await?;
//! ```

pub mod entry;
pub mod error;
pub mod logger;
pub mod stats;
pub mod storage;

pub use entry::{AuditEntry, AuditEntryBuilder, AuditEntryKind};
pub use error::AuditError;
pub use logger::{AuditFilter, AuditLogger};
pub use stats::{ClassificationStats, Ranked, TimeRange, UsageStats};
pub use storage::{
    AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage, StoreStorage,
};
