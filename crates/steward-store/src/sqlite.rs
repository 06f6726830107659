//! SQLite store backend.
//!
//! One table, `kv`, keyed by string. Writes bump an integer version in the
//! same statement so compare-and-swap needs no explicit transaction.

use crate::{KeyValueStore, Record, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    version    INTEGER NOT NULL,
    updated_at TEXT NOT NULL
)";

/// SQLite-backed [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        ensure_parent_dir(path)?;
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mainly for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the table if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        tracing::debug!("SQLite store ready");
        Ok(Self { pool })
    }

    fn decode(value: &str, version: i64) -> Result<Record, StoreError> {
        Ok(Record {
            value: serde_json::from_str(value)?,
            version: version as u64,
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT value, version FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                let version: i64 = row.try_get("version")?;
                Ok(Some(Self::decode(&value, version)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO kv (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = kv.version + 1,
                updated_at = excluded.updated_at
             RETURNING version",
        )
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let version: i64 = row.try_get("version")?;
        Ok(version as u64)
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Value,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let body = serde_json::to_string(&value)?;
        let now = Utc::now().to_rfc3339();

        match expected {
            None => {
                let result = sqlx::query(
                    "INSERT INTO kv (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)
                     ON CONFLICT(key) DO NOTHING",
                )
                .bind(key)
                .bind(body)
                .bind(now)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict {
                        key: key.to_string(),
                    });
                }
                Ok(1)
            }
            Some(expected) => {
                let row = sqlx::query(
                    "UPDATE kv SET value = ?1, version = version + 1, updated_at = ?2
                     WHERE key = ?3 AND version = ?4
                     RETURNING version",
                )
                .bind(body)
                .bind(now)
                .bind(key)
                .bind(expected as i64)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(row) => {
                        let version: i64 = row.try_get("version")?;
                        Ok(version as u64)
                    }
                    None => Err(StoreError::Conflict {
                        key: key.to_string(),
                    }),
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("DELETE FROM kv WHERE key = ?1 RETURNING value, version")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                let version: i64 = row.try_get("version")?;
                Ok(Some(Self::decode(&value, version)?))
            }
            None => Ok(None),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Record)>, StoreError> {
        let rows = sqlx::query(
            "SELECT key, value, version FROM kv
             WHERE substr(key, 1, ?2) = ?1
             ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix.chars().count() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            let version: i64 = row.try_get("version")?;
            records.push((key, Self::decode(&value, version)?));
        }
        Ok(records)
    }
}

fn ensure_parent_dir(file_path: &str) -> Result<(), StoreError> {
    let p = Path::new(file_path);
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_cas() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert_eq!(store.put_if_version("s/1", json!({"step": "name"}), None).await.unwrap(), 1);
        assert!(store
            .put_if_version("s/1", json!({}), None)
            .await
            .unwrap_err()
            .is_conflict());

        assert_eq!(store.put_if_version("s/1", json!({"step": "price"}), Some(1)).await.unwrap(), 2);
        assert!(store
            .put_if_version("s/1", json!({}), Some(1))
            .await
            .unwrap_err()
            .is_conflict());

        let record = store.get("s/1").await.unwrap().unwrap();
        assert_eq!(record.value, json!({"step": "price"}));
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_sqlite_take_and_prefix() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put("confirm/7/a", json!(1)).await.unwrap();
        store.put("confirm/7/b", json!(2)).await.unwrap();
        store.put("confirm/70/a", json!(3)).await.unwrap();

        let listed = store.list_by_prefix("confirm/7/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "confirm/7/a");

        assert!(store.take("confirm/7/a").await.unwrap().is_some());
        assert!(store.take("confirm/7/a").await.unwrap().is_none());
        assert!(store.delete("confirm/7/b").await.unwrap());
        assert!(!store.delete("confirm/7/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/steward.sqlite");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::connect(path).await.unwrap();
            store.put("session/1", json!({"kind": "create_product"})).await.unwrap();
        }

        let reopened = SqliteStore::connect(path).await.unwrap();
        let record = reopened.get("session/1").await.unwrap().unwrap();
        assert_eq!(record.value["kind"], "create_product");
    }
}
