//! Boundaries to external collaborators.
//!
//! The engine never talks HTTP itself. The completion service, the domain
//! backend and reply delivery sit behind these traits; `steward-server`
//! provides HTTP implementations and tests provide fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use steward_core::{Button, Reply, TextFormat};
use thiserror::Error;

// =============================================================================
// Completion
// =============================================================================

/// A prompt for the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Instructions, registry and examples.
    pub system: String,
    /// The operator's message.
    pub user: String,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("service returned status {status}")]
    Status { status: u16 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// `complete(prompt) -> rawText`. Callers bound the call with a timeout.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError>;
}

// =============================================================================
// Domain service
// =============================================================================

/// Reference to an entity created by the domain service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// The backend that owns orders, products and media.
#[async_trait]
pub trait DomainService: Send + Sync {
    /// Materialise an entity collected by a wizard.
    async fn create_entity(&self, kind: &str, payload: &Value) -> Result<EntityRef, DomainError>;

    /// Run a domain-backed action and return its JSON result.
    async fn invoke(&self, action: &str, params: &Map<String, Value>) -> Result<Value, DomainError>;
}

// =============================================================================
// Reply delivery
// =============================================================================

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery timed out")]
    Timeout,
}

/// Outbound chat surface.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(
        &self,
        chat_id: &str,
        text: &str,
        buttons: &[Button],
        format: TextFormat,
    ) -> Result<(), ReplyError>;

    async fn edit(&self, chat_id: &str, message_id: &str, text: &str) -> Result<(), ReplyError>;

    async fn send_document(
        &self,
        chat_id: &str,
        bytes: &[u8],
        filename: &str,
        caption: Option<&str>,
    ) -> Result<(), ReplyError>;
}

/// Deliver a [`Reply`] through a sink.
pub async fn deliver(sink: &dyn ReplySink, chat_id: &str, reply: &Reply) -> Result<(), ReplyError> {
    match reply {
        Reply::Text {
            text,
            buttons,
            format,
        } => sink.send(chat_id, text, buttons, *format).await,
        Reply::Edit { message_id, text } => sink.edit(chat_id, message_id, text).await,
        Reply::Document {
            filename,
            bytes,
            caption,
        } => {
            sink.send_document(chat_id, bytes, filename, caption.as_deref())
                .await
        }
    }
}
