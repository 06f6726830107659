//! # steward-store
//!
//! The durable store boundary. Conversation state, pending confirmations and
//! the audit log all live behind [`KeyValueStore`], never only in process
//! memory, because consecutive webhook invocations for the same user may land
//! on different processes.
//!
//! Every record carries a version that starts at 1 and grows by one on each
//! write. [`KeyValueStore::put_if_version`] is the compare-and-swap primitive
//! used for optimistic concurrency; [`KeyValueStore::take`] is an atomic
//! get-and-delete used for single-use records.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryStore`] | tests and single-process deployments |
//! | [`SqliteStore`] | SQLite file shared by every process on a host |
//! | [`TimedStore`] | wraps any backend with a per-operation timeout |

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod timed;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use timed::TimedStore;

/// A stored value and its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub value: Value,
    pub version: u64,
}

/// Keyed access to durable storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a record.
    async fn get(&self, key: &str) -> Result<Option<Record>, StoreError>;

    /// Unconditionally write a value, returning the new version.
    async fn put(&self, key: &str, value: Value) -> Result<u64, StoreError>;

    /// Write only if the current version equals `expected`. `None` means the
    /// key must not exist yet. Fails with [`StoreError::Conflict`] otherwise.
    async fn put_if_version(
        &self,
        key: &str,
        value: Value,
        expected: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Delete a key, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically read and delete a key. At most one caller observes the record.
    async fn take(&self, key: &str) -> Result<Option<Record>, StoreError>;

    /// All records whose key starts with `prefix`, in ascending key order.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Record)>, StoreError>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Escape `raw` for use as one `/`-separated key segment, so a caller-supplied
/// id can never reach into another id's prefix. `%` and `/` are
/// percent-encoded; anything else passes through.
pub fn key_segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['%', '/']) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Read and deserialize a typed record.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<(T, u64)>, StoreError> {
    match store.get(key).await? {
        Some(record) => {
            let value = serde_json::from_value(record.value)?;
            Ok(Some((value, record.version)))
        }
        None => Ok(None),
    }
}

/// Serialize and write a typed record with compare-and-swap.
pub async fn save_if_version<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    expected: Option<u64>,
) -> Result<u64, StoreError> {
    let value = serde_json::to_value(value)?;
    store.put_if_version(key, value, expected).await
}

/// Serialize and write a typed record unconditionally.
pub async fn save<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<u64, StoreError> {
    let value = serde_json::to_value(value)?;
    store.put(key, value).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segment_escapes_separators() {
        assert_eq!(key_segment("1"), "1");
        assert_eq!(key_segment("1/x"), "1%2Fx");
        assert_eq!(key_segment("50%"), "50%25");
        // The escape character itself is escaped, so encodings stay distinct.
        assert_ne!(key_segment("1%2Fx"), key_segment("1/x"));
    }
}
