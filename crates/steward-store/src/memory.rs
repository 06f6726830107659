//! In-memory store backend.

use crate::{KeyValueStore, Record, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Process-local store. Correct for a single process; loses data on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_err<T>(_: T) -> StoreError {
        StoreError::Backend("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let records = self.records.read().map_err(Self::lock_err)?;
        Ok(records.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<u64, StoreError> {
        let mut records = self.records.write().map_err(Self::lock_err)?;
        let version = records.get(key).map_or(1, |r| r.version + 1);
        records.insert(key.to_string(), Record { value, version });
        Ok(version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Value,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.write().map_err(Self::lock_err)?;
        let current = records.get(key).map(|r| r.version);
        if current != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        let version = current.map_or(1, |v| v + 1);
        records.insert(key.to_string(), Record { value, version });
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(Self::lock_err)?;
        Ok(records.remove(key).is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let mut records = self.records.write().map_err(Self::lock_err)?;
        Ok(records.remove(key))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Record)>, StoreError> {
        let records = self.records.read().map_err(Self::lock_err)?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }
}
