//! Per-operation timeout wrapper.

use crate::{KeyValueStore, Record, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Bounds every call to the inner store so one slow backend call cannot hold
/// a webhook invocation indefinitely.
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: KeyValueStore> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TimedStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn put(&self, key: &str, value: Value) -> Result<u64, StoreError> {
        self.bounded(self.inner.put(key, value)).await
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Value,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.bounded(self.inner.put_if_version(key, value, expected))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded(self.inner.delete(key)).await
    }

    async fn take(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.bounded(self.inner.take(key)).await
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Record)>, StoreError> {
        self.bounded(self.inner.list_by_prefix(prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;

    struct SlowStore;

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Option<Record>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn put(&self, _key: &str, _value: Value) -> Result<u64, StoreError> {
            Ok(1)
        }
        async fn put_if_version(
            &self,
            _key: &str,
            _value: Value,
            _expected: Option<u64>,
        ) -> Result<u64, StoreError> {
            Ok(1)
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn take(&self, _key: &str) -> Result<Option<Record>, StoreError> {
            Ok(None)
        }
        async fn list_by_prefix(
            &self,
            _prefix: &str,
        ) -> Result<Vec<(String, Record)>, StoreError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let store = TimedStore::new(SlowStore, Duration::from_millis(20));
        let err = store.get("x").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { ms: 20 }));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let store = TimedStore::new(MemoryStore::new(), Duration::from_secs(1));
        store.put("a", json!(1)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().version, 1);
    }
}
