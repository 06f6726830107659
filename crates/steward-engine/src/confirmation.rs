//! Confirmation gate for destructive actions.
//!
//! A destructive action needs two independent operator turns: the first
//! creates a pending [`Confirmation`], the second resolves it. Pending
//! confirmations live in the durable store so that the resolving turn can be
//! handled by a different process than the one that created it.
//!
//! ## Flow
//!
//! 1. Classification yields a destructive intent
//! 2. [`ConfirmationGate::request`] stores it with a fixed TTL
//! 3. Operator replies "yes" (or presses the button)
//! 4. [`ConfirmationGate::resolve`] atomically takes the newest live entry
//! 5. The action is dispatched exactly once

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use steward_core::{ConfirmationConfig, SharedClock};
use steward_store::{Record, SharedStore, StoreError};
use uuid::Uuid;

/// Key prefix for pending confirmations.
pub const CONFIRM_PREFIX: &str = "confirm/";

/// Callback data of the confirm button.
pub const CONFIRM_YES: &str = "confirm:yes";
/// Callback data of the decline button.
pub const CONFIRM_NO: &str = "confirm:no";

/// A pending confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub id: String,
    pub user_id: String,
    pub action: String,
    /// Snapshot of the params at request time.
    pub params: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Confirmation {
    /// Expired strictly after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    fn key(&self) -> String {
        format!(
            "{}{:020}-{}",
            user_prefix(&self.user_id),
            self.created_at.timestamp_millis().max(0),
            self.id
        )
    }
}

fn user_prefix(user_id: &str) -> String {
    format!("{}{}/", CONFIRM_PREFIX, steward_store::key_segment(user_id))
}

/// Per-user view of the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationState {
    Idle,
    Awaiting(Confirmation),
}

/// How an operator reply relates to a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Affirmative,
    Negative,
    Other,
}

/// Two-phase commit over the durable store.
pub struct ConfirmationGate {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
    affirmative: Vec<String>,
    negative: Vec<String>,
}

impl ConfirmationGate {
    pub fn new(config: &ConfirmationConfig, store: SharedStore, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(config.ttl_secs),
            affirmative: normalize_tokens(&config.affirmative),
            negative: normalize_tokens(&config.negative),
        }
    }

    /// Store a pending confirmation. Earlier pending confirmations of the same
    /// user are superseded.
    pub async fn request(
        &self,
        user_id: &str,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<Confirmation, StoreError> {
        let superseded = self.cancel_all(user_id).await?;
        if superseded > 0 {
            tracing::debug!(user_id = %user_id, superseded, "Superseded pending confirmations");
        }

        let now = self.clock.now();
        let confirmation = Confirmation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            action: action.to_string(),
            params,
            created_at: now,
            expires_at: now + self.ttl,
        };

        let value = serde_json::to_value(&confirmation)?;
        self.store
            .put_if_version(&confirmation.key(), value, None)
            .await?;

        tracing::info!(
            user_id = %user_id,
            action = %action,
            confirmation_id = %confirmation.id,
            "Confirmation requested"
        );
        Ok(confirmation)
    }

    /// Take the newest live confirmation for the user. Single use: a second
    /// call without a new request returns `None`. Expired entries found on the
    /// way are discarded.
    pub async fn resolve(&self, user_id: &str) -> Result<Option<Confirmation>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.store.list_by_prefix(&user_prefix(user_id)).await?;
        entries.reverse();

        for (key, record) in entries {
            let Some(pending) = decode(&key, record) else {
                self.store.delete(&key).await?;
                continue;
            };

            if pending.is_expired(now) {
                self.store.delete(&key).await?;
                continue;
            }

            // Another process may have taken it between list and take.
            if let Some(taken) = self.store.take(&key).await? {
                if let Some(confirmation) = decode(&key, taken) {
                    tracing::info!(
                        user_id = %user_id,
                        action = %confirmation.action,
                        confirmation_id = %confirmation.id,
                        "Confirmation resolved"
                    );
                    return Ok(Some(confirmation));
                }
            }
        }

        Ok(None)
    }

    /// Remove every pending confirmation for the user.
    pub async fn cancel_all(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (key, _) in self.store.list_by_prefix(&user_prefix(user_id)).await? {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Newest live confirmation without consuming it.
    pub async fn state(&self, user_id: &str) -> Result<ConfirmationState, StoreError> {
        let now = self.clock.now();
        let entries = self.store.list_by_prefix(&user_prefix(user_id)).await?;

        let newest = entries
            .into_iter()
            .rev()
            .filter_map(|(key, record)| decode(&key, record))
            .find(|c| !c.is_expired(now));

        Ok(match newest {
            Some(confirmation) => ConfirmationState::Awaiting(confirmation),
            None => ConfirmationState::Idle,
        })
    }

    /// Discard expired confirmations of every user.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut removed = 0;
        for (key, record) in self.store.list_by_prefix(CONFIRM_PREFIX).await? {
            let expired = decode(&key, record).is_none_or(|c| c.is_expired(now));
            if expired && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "Swept expired confirmations");
        }
        Ok(removed)
    }

    /// Match a reply against the configured token sets.
    pub fn classify_reply(&self, text: &str) -> ReplyKind {
        match text.trim() {
            CONFIRM_YES => return ReplyKind::Affirmative,
            CONFIRM_NO => return ReplyKind::Negative,
            _ => {}
        }

        let normalized = normalize(text);
        if self.affirmative.contains(&normalized) {
            ReplyKind::Affirmative
        } else if self.negative.contains(&normalized) {
            ReplyKind::Negative
        } else {
            ReplyKind::Other
        }
    }
}

fn decode(key: &str, record: Record) -> Option<Confirmation> {
    match serde_json::from_value(record.value) {
        Ok(confirmation) => Some(confirmation),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding malformed confirmation");
            None
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['!', '.', '?'])
        .trim()
        .to_lowercase()
}

fn normalize_tokens(tokens: &[String]) -> Vec<String> {
    tokens.iter().map(|t| normalize(t)).collect()
}
