//! Error types for the conversation engine.
//!
//! None of these messages are shown to the operator verbatim: the engine maps
//! every failure to a fixed user-facing text (see [`crate::messages`]).

use steward_audit::AuditError;
use steward_store::StoreError;
use thiserror::Error;

use crate::ports::{CompletionError, DomainError};

/// Errors surfaced by engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Durable store read/write failed.
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    /// Audit query failed (appends never fail).
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// A registry entry is malformed.
    #[error("invalid action descriptor {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A wizard step rejected its input. The message is a re-prompt hint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a value.")]
    Empty,

    #[error("That is too long (at most {max} characters).")]
    TooLong { max: usize },

    #[error("Please enter a number.")]
    NotANumber,

    #[error("Please enter a whole number.")]
    NotAnInteger,

    #[error("Please enter a number greater than zero.")]
    NotPositive,

    #[error("The number can't be negative.")]
    Negative,

    #[error("Please send a photo, or press Done.")]
    ExpectedPhoto,

    #[error("Please send a video, or press Skip.")]
    ExpectedVideo,

    #[error("Please answer with text.")]
    ExpectedText,

    #[error("Finish this step first, or send /cancel to stop.")]
    CommandInWizard,
}

/// One classification attempt failed.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("completion timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("no JSON object in completion output")]
    NoJson,

    #[error("invalid JSON after repair: {0}")]
    Parse(String),

    #[error("invalid intent: {0}")]
    Invalid(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("params for {action} do not match schema: {reason}")]
    Schema { action: String, reason: String },
}

/// A handler failed. Caught at the dispatch boundary.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("domain service error: {0}")]
    Domain(#[from] DomainError),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
