//! Audit storage backends.

use crate::entry::AuditEntry;
use crate::error::AuditError;
use crate::logger::AuditFilter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steward_store::SharedStore;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Key prefix for audit entries in the durable store.
pub const AUDIT_PREFIX: &str = "audit/";

/// Trait for audit storage backends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Append an entry.
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError>;

    /// Entries matching the filter, newest first, truncated to `filter.limit`.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError>;

    /// Delete entries that occurred before `cutoff`, returning how many.
    async fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError>;
}

/// Apply a filter to a set of entries: match, sort newest first, truncate.
pub(crate) fn select(entries: impl IntoIterator<Item = AuditEntry>, filter: &AuditFilter) -> Vec<AuditEntry> {
    let mut results: Vec<_> = entries.into_iter().filter(|e| filter.matches(e)).collect();
    results.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    if let Some(limit) = filter.limit {
        results.truncate(limit);
    }
    results
}

/// Entries kept in the durable key-value store, one key per entry.
///
/// Keys sort chronologically: `audit/<millis, zero-padded>/<uuid>`.
pub struct StoreStorage {
    store: SharedStore,
}

impl StoreStorage {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn key(entry: &AuditEntry) -> String {
        format!(
            "{}{:020}/{}",
            AUDIT_PREFIX,
            entry.occurred_at.timestamp_millis().max(0),
            entry.id
        )
    }

    async fn load_all(&self) -> Result<Vec<(String, AuditEntry)>, AuditError> {
        let records = self.store.list_by_prefix(AUDIT_PREFIX).await?;
        let mut entries = Vec::with_capacity(records.len());
        for (key, record) in records {
            match serde_json::from_value::<AuditEntry>(record.value) {
                Ok(entry) => entries.push((key, entry)),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping malformed audit record"),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl AuditStorage for StoreStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let key = Self::key(&entry);
        let value = serde_json::to_value(&entry)?;
        // Write-once: a second write to the same key is a conflict.
        self.store.put_if_version(&key, value, None).await?;
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.load_all().await?;
        Ok(select(entries.into_iter().map(|(_, e)| e), filter))
    }

    async fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let mut removed = 0;
        for (key, entry) in self.load_all().await? {
            if entry.occurred_at < cutoff && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// JSON Lines file (one entry per line).
///
/// Queries read the file, so several processes appending to the same file see
/// each other's entries.
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Create a file storage, creating the parent directory if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse audit entry on line {} of {}: {}",
                        line_num + 1,
                        self.path.display(),
                        e
                    );
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut json = serde_json::to_string(&entry)?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(select(self.read_all().await?, filter))
    }

    async fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let _guard = self.write_lock.lock().await;
        let entries = self.read_all().await?;
        let before = entries.len();

        let mut body = String::new();
        for entry in entries.iter().filter(|e| e.occurred_at >= cutoff) {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        let retained = body.lines().count();

        let tmp = self.path.with_extension("log.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(before - retained)
    }
}

/// Console storage (prints to stdout, not queryable).
pub struct ConsoleStorage;

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        println!("{}", entry.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(vec![])
    }

    async fn remove_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        Ok(0)
    }
}

/// Discards everything.
pub struct NullStorage;

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Ok(())
    }

    async fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(vec![])
    }

    async fn remove_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        Ok(0)
    }
}

/// A queryable primary backend mirrored to the console.
pub struct DualStorage {
    primary: Arc<dyn AuditStorage>,
}

impl DualStorage {
    pub fn new(primary: Arc<dyn AuditStorage>) -> Self {
        Self { primary }
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        println!("{}", entry.to_log_line());
        self.primary.store(entry).await
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        self.primary.query(filter).await
    }

    async fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        self.primary.remove_before(cutoff).await
    }
}
