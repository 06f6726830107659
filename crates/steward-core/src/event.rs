//! Transport-level event and reply shapes.
//!
//! The chat transport delivers one [`InboundEvent`] per invocation and expects
//! exactly one [`Reply`] back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Free text typed by the operator.
    Text,
    /// A photo upload; payload is the transport file id.
    Photo,
    /// A video upload; payload is the transport file id.
    Video,
    /// A slash command, e.g. `/help`.
    Command,
    /// A button press; payload is the button's callback data.
    Callback,
}

/// An event delivered by the webhook transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub user_id: String,
    pub chat_id: String,
    pub message_id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        kind: EventKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            kind,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for a text event in a private chat (chat id = user id).
    pub fn text(user_id: &str, message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(user_id, user_id, message_id, EventKind::Text, text)
    }

    /// Shorthand for a button press in a private chat.
    pub fn callback(user_id: &str, message_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(user_id, user_id, message_id, EventKind::Callback, data)
    }

    /// Shorthand for a photo upload in a private chat.
    pub fn photo(user_id: &str, message_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self::new(user_id, user_id, message_id, EventKind::Photo, file_id)
    }

    /// Shorthand for a video upload in a private chat.
    pub fn video(user_id: &str, message_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self::new(user_id, user_id, message_id, EventKind::Video, file_id)
    }

    /// Trimmed payload for text-like events (text and commands).
    pub fn text_payload(&self) -> Option<&str> {
        match self.kind {
            EventKind::Text | EventKind::Command => Some(self.payload.trim()),
            _ => None,
        }
    }
}

/// Inline button attached to a text reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Text formatting hint for the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
    Html,
}

/// The single reply produced for one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// `send(chatId, text, {buttons, formatting})`
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        buttons: Vec<Button>,
        #[serde(default)]
        format: TextFormat,
    },
    /// `edit(chatId, messageId, text)`
    Edit { message_id: String, text: String },
    /// `sendDocument(chatId, bytes, filename)`
    Document {
        filename: String,
        bytes: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            buttons: Vec::new(),
            format: TextFormat::Plain,
        }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<Button>) -> Self {
        Reply::Text {
            text: text.into(),
            buttons,
            format: TextFormat::Plain,
        }
    }

    pub fn edit(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Reply::Edit {
            message_id: message_id.into(),
            text: text.into(),
        }
    }

    pub fn document(filename: impl Into<String>, bytes: Vec<u8>, caption: Option<String>) -> Self {
        Reply::Document {
            filename: filename.into(),
            bytes,
            caption,
        }
    }

    /// The human-readable text of the reply (caption for documents).
    pub fn body(&self) -> &str {
        match self {
            Reply::Text { text, .. } | Reply::Edit { text, .. } => text,
            Reply::Document { caption, .. } => caption.as_deref().unwrap_or(""),
        }
    }

    /// Buttons attached to a text reply.
    pub fn buttons(&self) -> &[Button] {
        match self {
            Reply::Text { buttons, .. } => buttons,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_event_wire_format() {
        let event: InboundEvent = serde_json::from_value(json!({
            "userId": "42",
            "chatId": "42",
            "messageId": "1001",
            "kind": "callback",
            "payload": "confirm:yes",
            "timestamp": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.kind, EventKind::Callback);
        assert_eq!(event.payload, "confirm:yes");
        assert!(event.text_payload().is_none());
    }

    #[test]
    fn test_reply_serialization_is_tagged() {
        let reply = Reply::with_buttons("Sure?", vec![Button::new("Yes", "confirm:yes")]);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["buttons"][0]["data"], "confirm:yes");
        assert_eq!(reply.body(), "Sure?");
    }
}
