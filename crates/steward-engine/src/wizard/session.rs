//! Durable per-user conversation state.
//!
//! The store is the source of truth. The optional read-through cache only
//! answers presence checks through [`SessionStore::load`]; anything that
//! decides a transition reads with [`SessionStore::load_fresh`]. Writes are
//! compare-and-swap against the stored version, and any conflict drops the
//! cached copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use steward_store::{SharedStore, StoreError};

use super::flow::{StepId, WizardKind};

/// Key prefix for conversation state.
pub const SESSION_PREFIX: &str = "session/";

/// A user's active wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub user_id: String,
    pub chat_id: String,
    pub kind: WizardKind,
    pub step: StepId,
    pub draft: Map<String, Value>,
    /// Last inbound message applied to this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// State plus the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub state: ConversationState,
    pub version: u64,
}

pub struct SessionStore {
    store: SharedStore,
    cache: Option<Mutex<HashMap<String, Versioned>>>,
}

impl SessionStore {
    pub fn new(store: SharedStore, cache: bool) -> Self {
        Self {
            store,
            cache: cache.then(|| Mutex::new(HashMap::new())),
        }
    }

    fn key(user_id: &str) -> String {
        format!("{}{}", SESSION_PREFIX, steward_store::key_segment(user_id))
    }

    /// Read the user's state, from cache when available. The cached copy
    /// may be stale and must not drive a transition.
    pub async fn load(&self, user_id: &str) -> Result<Option<Versioned>, StoreError> {
        if let Some(hit) = self.cached(user_id) {
            return Ok(Some(hit));
        }
        self.load_fresh(user_id).await
    }

    /// Read the user's state from the store, refreshing the cache.
    pub async fn load_fresh(&self, user_id: &str) -> Result<Option<Versioned>, StoreError> {
        let loaded = steward_store::load::<ConversationState>(self.store.as_ref(), &Self::key(user_id))
            .await?
            .map(|(state, version)| Versioned { state, version });

        match &loaded {
            Some(v) => self.remember(user_id, v.clone()),
            None => self.invalidate(user_id),
        }
        Ok(loaded)
    }

    /// Write `state` if the stored version still equals `expected`.
    pub async fn save(
        &self,
        state: &ConversationState,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let key = Self::key(&state.user_id);
        match steward_store::save_if_version(self.store.as_ref(), &key, state, expected).await {
            Ok(version) => {
                self.remember(
                    &state.user_id,
                    Versioned {
                        state: state.clone(),
                        version,
                    },
                );
                Ok(version)
            }
            Err(e) => {
                self.invalidate(&state.user_id);
                Err(e)
            }
        }
    }

    /// Remove the user's state.
    pub async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        self.invalidate(user_id);
        self.store.delete(&Self::key(user_id)).await
    }

    /// Drop the cached copy for a user.
    pub fn invalidate(&self, user_id: &str) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(user_id);
        }
    }

    fn cached(&self, user_id: &str) -> Option<Versioned> {
        let cache = self.cache.as_ref()?;
        cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    fn remember(&self, user_id: &str, versioned: Versioned) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(user_id.to_string(), versioned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use steward_store::{KeyValueStore, MemoryStore};

    fn state(user: &str) -> ConversationState {
        let now = Utc::now();
        ConversationState {
            user_id: user.to_string(),
            chat_id: user.to_string(),
            kind: WizardKind::CreateProduct,
            step: StepId::Name,
            draft: Map::new(),
            last_message_id: None,
            started_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let sessions = SessionStore::new(Arc::new(MemoryStore::new()), false);
        let v1 = sessions.save(&state("1"), None).await.unwrap();
        assert_eq!(v1, 1);

        let loaded = sessions.load("1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.state.step, StepId::Name);

        assert!(sessions.save(&state("1"), None).await.unwrap_err().is_conflict());
        assert!(sessions.delete("1").await.unwrap());
        assert!(sessions.load("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_id_is_escaped_in_key() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(store.clone(), false);
        sessions.save(&state("1/x"), None).await.unwrap();

        assert!(store.get("session/1%2Fx").await.unwrap().is_some());
        assert!(sessions.load("1").await.unwrap().is_none());
        assert_eq!(sessions.load("1/x").await.unwrap().unwrap().state.user_id, "1/x");
    }

    #[tokio::test]
    async fn test_stale_cache_is_not_authoritative() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(store.clone(), true);
        sessions.save(&state("1"), None).await.unwrap();

        // Another process advances the state behind our cache.
        let mut other = state("1");
        other.step = StepId::Description;
        store
            .put_if_version("session/1", serde_json::to_value(&other).unwrap(), Some(1))
            .await
            .unwrap();

        let cached = sessions.load("1").await.unwrap().unwrap();
        assert_eq!(cached.version, 1);

        // Writing from the stale copy conflicts and drops it.
        let err = sessions.save(&cached.state, Some(cached.version)).await.unwrap_err();
        assert!(err.is_conflict());

        let fresh = sessions.load("1").await.unwrap().unwrap();
        assert_eq!(fresh.version, 2);
        assert_eq!(fresh.state.step, StepId::Description);
    }
}
