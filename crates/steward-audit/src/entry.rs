//! Audit entry types.
//!
//! One [`AuditEntry`] is written for every action attempt, outcome, gate
//! decision, wizard transition and classification attempt. Entries are
//! write-once: nothing updates an entry after it is appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use steward_core::ActionCategory;
use uuid::Uuid;

/// Type of audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryKind {
    // ===== Dispatch =====
    /// Dispatcher is about to invoke a handler.
    ActionAttempted,
    /// Handler finished successfully.
    ActionSucceeded,
    /// Handler returned an error (or panicked).
    ActionFailed,

    // ===== Confirmation gate =====
    /// A destructive action is waiting for a second turn.
    ConfirmationRequested,
    /// The operator confirmed; the action is dispatched next.
    ConfirmationResolved,
    /// The operator declined or moved on.
    ConfirmationCancelled,

    // ===== Wizards =====
    WizardStarted,
    /// Step input accepted and merged into the draft.
    WizardStepAccepted,
    /// Step input failed validation.
    WizardRejected,
    WizardCommitted,
    WizardCancelled,

    // ===== Classifier / gatekeeping =====
    /// One completion call plus parse/validate.
    ClassificationAttempt,
    /// Request denied by the rate limiter.
    RateLimited,
    /// Event from a user outside the operator allow-list.
    AuthorizationDenied,
}

impl AuditEntryKind {
    /// Entries that represent the outcome of a dispatched action.
    pub fn is_action_outcome(&self) -> bool {
        matches!(self, Self::ActionSucceeded | Self::ActionFailed)
    }
}

impl std::fmt::Display for AuditEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActionAttempted => write!(f, "ACTION_ATTEMPTED"),
            Self::ActionSucceeded => write!(f, "ACTION_SUCCEEDED"),
            Self::ActionFailed => write!(f, "ACTION_FAILED"),
            Self::ConfirmationRequested => write!(f, "CONFIRMATION_REQUESTED"),
            Self::ConfirmationResolved => write!(f, "CONFIRMATION_RESOLVED"),
            Self::ConfirmationCancelled => write!(f, "CONFIRMATION_CANCELLED"),
            Self::WizardStarted => write!(f, "WIZARD_STARTED"),
            Self::WizardStepAccepted => write!(f, "WIZARD_STEP_ACCEPTED"),
            Self::WizardRejected => write!(f, "WIZARD_REJECTED"),
            Self::WizardCommitted => write!(f, "WIZARD_COMMITTED"),
            Self::WizardCancelled => write!(f, "WIZARD_CANCELLED"),
            Self::ClassificationAttempt => write!(f, "CLASSIFICATION_ATTEMPT"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::AuthorizationDenied => write!(f, "AUTHZ_DENIED"),
        }
    }
}

/// An audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: Uuid,

    /// When the entry was recorded.
    pub occurred_at: DateTime<Utc>,

    /// Entry type.
    pub kind: AuditEntryKind,

    // ===== Core fields =====
    /// Operator the entry belongs to.
    pub user_id: String,

    /// Action name (or a pseudo-action such as `classify`).
    pub action: String,

    /// Category of the action.
    pub category: ActionCategory,

    /// Whether the step this entry describes succeeded.
    pub success: bool,

    /// Error description for failures. Never shown to the operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Handler or completion latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    // ===== Context =====
    /// Attempt number for classification entries (1-based).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Confirmation ID for gate entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,

    /// Action parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,

    /// Groups the entries of one user turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl AuditEntry {
    /// Create a new successful entry with the given core fields.
    pub fn new(
        kind: AuditEntryKind,
        user_id: impl Into<String>,
        action: impl Into<String>,
        category: ActionCategory,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind,
            user_id: user_id.into(),
            action: action.into(),
            category,
            success: true,
            error: None,
            duration_ms: None,
            attempt: None,
            confirmation_id: None,
            params: None,
            correlation_id: None,
            meta: serde_json::Value::Null,
        }
    }

    /// Create a builder for an audit entry.
    pub fn builder(
        kind: AuditEntryKind,
        user_id: impl Into<String>,
        action: impl Into<String>,
        category: ActionCategory,
    ) -> AuditEntryBuilder {
        AuditEntryBuilder::new(kind, user_id, action, category)
    }

    /// Format the entry as a human-readable log line.
    ///
    /// Format: `[timestamp] KIND user=... action=... category=... ok=...`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} user={} action={} category={} ok={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.kind,
            self.user_id,
            self.action,
            self.category,
            self.success,
        );

        if let Some(duration) = self.duration_ms {
            line.push_str(&format!(" duration_ms={}", duration));
        }

        if let Some(attempt) = self.attempt {
            line.push_str(&format!(" attempt={}", attempt));
        }

        if let Some(ref id) = self.confirmation_id {
            line.push_str(&format!(" confirmation_id={}", id));
        }

        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        line
    }
}

/// Builder for creating audit entries.
#[derive(Debug)]
pub struct AuditEntryBuilder {
    entry: AuditEntry,
}

impl AuditEntryBuilder {
    pub fn new(
        kind: AuditEntryKind,
        user_id: impl Into<String>,
        action: impl Into<String>,
        category: ActionCategory,
    ) -> Self {
        Self {
            entry: AuditEntry::new(kind, user_id, action, category),
        }
    }

    /// Override the timestamp.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.entry.occurred_at = at;
        self
    }

    /// Mark the entry as failed with an error description.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.entry.success = false;
        self.entry.error = Some(error.into());
        self
    }

    /// Set the success flag.
    pub fn success(mut self, success: bool) -> Self {
        self.entry.success = success;
        self
    }

    /// Set the duration in milliseconds.
    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.entry.duration_ms = Some(duration);
        self
    }

    /// Set the classification attempt number.
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.entry.attempt = Some(attempt);
        self
    }

    /// Set the confirmation ID.
    pub fn confirmation_id(mut self, id: impl Into<String>) -> Self {
        self.entry.confirmation_id = Some(id.into());
        self
    }

    /// Set the action parameters.
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.entry.params = Some(params);
        self
    }

    /// Set the correlation ID.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.entry.correlation_id = Some(id.into());
        self
    }

    /// Set additional metadata.
    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.entry.meta = meta;
        self
    }

    /// Build the audit entry.
    pub fn build(self) -> AuditEntry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let entry = AuditEntry::builder(
            AuditEntryKind::ActionSucceeded,
            "42",
            "list_orders",
            ActionCategory::Order,
        )
        .duration_ms(15)
        .params(serde_json::json!({"limit": 5}))
        .build();

        assert_eq!(entry.kind, AuditEntryKind::ActionSucceeded);
        assert_eq!(entry.user_id, "42");
        assert!(entry.success);
        assert_eq!(entry.duration_ms, Some(15));
    }

    #[test]
    fn test_error_marks_failure() {
        let entry = AuditEntry::builder(
            AuditEntryKind::ActionFailed,
            "42",
            "delete_product",
            ActionCategory::Product,
        )
        .error("domain service returned 500")
        .build();

        assert!(!entry.success);
        let line = entry.to_log_line();
        assert!(line.contains("ACTION_FAILED"));
        assert!(line.contains("user=42"));
        assert!(line.contains("ok=false"));
        assert!(line.contains("error=\"domain service returned 500\""));
    }

    #[test]
    fn test_kind_display_and_outcome() {
        assert_eq!(
            format!("{}", AuditEntryKind::ClassificationAttempt),
            "CLASSIFICATION_ATTEMPT"
        );
        assert!(AuditEntryKind::ActionFailed.is_action_outcome());
        assert!(!AuditEntryKind::ActionAttempted.is_action_outcome());
    }
}
