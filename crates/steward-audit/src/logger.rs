//! Audit logger implementation.
//!
//! Provides the main [`AuditLogger`] type with helper methods for the entries
//! the conversation engine writes. Appending never fails from the caller's
//! point of view: a storage failure is reported through `tracing` and the
//! turn carries on.

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use steward_core::{ActionCategory, AuditBackend, AuditConfig, SharedClock, SystemClock};
use steward_store::SharedStore;

use crate::entry::{AuditEntry, AuditEntryBuilder, AuditEntryKind};
use crate::error::AuditError;
use crate::stats::{TimeRange, UsageStats};
use crate::storage::{
    AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage, StoreStorage,
};

/// Upper bound on entries returned by an export.
const EXPORT_CAP: usize = 10_000;

/// The main audit logger.
pub struct AuditLogger {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
    clock: SharedClock,
}

impl AuditLogger {
    /// Create a new audit logger with the given configuration.
    ///
    /// `store` backs the `store` backend; other backends ignore it.
    pub fn new(
        config: AuditConfig,
        store: SharedStore,
        clock: SharedClock,
    ) -> Result<Self, AuditError> {
        let primary: Arc<dyn AuditStorage> = if !config.enabled {
            Arc::new(NullStorage)
        } else {
            match config.backend {
                AuditBackend::Store => Arc::new(StoreStorage::new(store)),
                AuditBackend::File => Arc::new(FileStorage::new(Self::resolve_log_path(&config))?),
                AuditBackend::Console => Arc::new(ConsoleStorage),
                AuditBackend::None => Arc::new(NullStorage),
            }
        };

        let storage: Arc<dyn AuditStorage> = if config.enabled
            && config.stdout
            && config.backend != AuditBackend::Console
        {
            Arc::new(DualStorage::new(primary))
        } else {
            primary
        };

        Ok(Self {
            config,
            storage,
            clock,
        })
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(
        config: AuditConfig,
        storage: Arc<dyn AuditStorage>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            storage,
            clock,
        }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            config: AuditConfig {
                enabled: false,
                ..Default::default()
            },
            storage: Arc::new(NullStorage),
            clock: SystemClock::shared(),
        }
    }

    /// Create a console-only logger (useful for development).
    pub fn console_only() -> Self {
        Self {
            config: AuditConfig {
                enabled: true,
                backend: AuditBackend::Console,
                ..Default::default()
            },
            storage: Arc::new(ConsoleStorage),
            clock: SystemClock::shared(),
        }
    }

    /// Resolve the log file path from configuration.
    fn resolve_log_path(config: &AuditConfig) -> PathBuf {
        let mut path = PathBuf::from(&config.directory);
        path.push("audit.log");
        path
    }

    /// Check if logging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Maximum entries per query.
    pub fn page_cap(&self) -> usize {
        self.config.page_cap
    }

    /// Start an entry stamped with the logger's clock.
    pub fn entry(
        &self,
        kind: AuditEntryKind,
        user_id: &str,
        action: &str,
        category: ActionCategory,
    ) -> AuditEntryBuilder {
        AuditEntry::builder(kind, user_id, action, category).occurred_at(self.clock.now())
    }

    /// Append an entry. Failures are logged locally and swallowed.
    pub async fn append(&self, entry: AuditEntry) {
        if !self.config.enabled {
            return;
        }

        tracing::debug!(
            entry_id = %entry.id,
            kind = %entry.kind,
            user = %entry.user_id,
            action = %entry.action,
            success = entry.success,
            "Audit entry"
        );

        let line = entry.to_log_line();
        if let Err(e) = self.storage.store(entry).await {
            tracing::error!(error = %e, entry = %line, "Failed to persist audit entry");
        }
    }

    /// Log that the dispatcher is about to run a handler. `meta` is stored
    /// as given; pass `Value::Null` for none.
    pub async fn log_action_attempted(
        &self,
        user_id: &str,
        action: &str,
        category: ActionCategory,
        params: &serde_json::Value,
        meta: serde_json::Value,
        correlation_id: &str,
    ) {
        let entry = self
            .entry(AuditEntryKind::ActionAttempted, user_id, action, category)
            .params(params.clone())
            .meta(meta)
            .correlation_id(correlation_id)
            .build();
        self.append(entry).await;
    }

    /// Log a successful handler run.
    pub async fn log_action_succeeded(
        &self,
        user_id: &str,
        action: &str,
        category: ActionCategory,
        duration_ms: u64,
        correlation_id: &str,
    ) {
        let entry = self
            .entry(AuditEntryKind::ActionSucceeded, user_id, action, category)
            .duration_ms(duration_ms)
            .correlation_id(correlation_id)
            .build();
        self.append(entry).await;
    }

    /// Log a failed handler run with its context.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_action_failed(
        &self,
        user_id: &str,
        action: &str,
        category: ActionCategory,
        duration_ms: u64,
        error: &str,
        params: &serde_json::Value,
        correlation_id: &str,
    ) {
        let entry = self
            .entry(AuditEntryKind::ActionFailed, user_id, action, category)
            .duration_ms(duration_ms)
            .error(error)
            .params(params.clone())
            .correlation_id(correlation_id)
            .build();
        self.append(entry).await;
    }

    /// Log one classification attempt.
    pub async fn log_classification_attempt(
        &self,
        user_id: &str,
        attempt: u32,
        duration_ms: u64,
        action: Option<&str>,
        error: Option<&str>,
        correlation_id: &str,
    ) {
        let mut builder = self
            .entry(
                AuditEntryKind::ClassificationAttempt,
                user_id,
                "classify",
                ActionCategory::System,
            )
            .attempt(attempt)
            .duration_ms(duration_ms)
            .correlation_id(correlation_id);

        if let Some(action) = action {
            builder = builder.meta(serde_json::json!({ "classified_as": action }));
        }
        if let Some(error) = error {
            builder = builder.error(error);
        }

        self.append(builder.build()).await;
    }

    /// Log a rate-limit denial.
    pub async fn log_rate_limited(&self, user_id: &str, reset_in_secs: u64) {
        let entry = self
            .entry(
                AuditEntryKind::RateLimited,
                user_id,
                "classify",
                ActionCategory::System,
            )
            .success(false)
            .meta(serde_json::json!({ "reset_in_secs": reset_in_secs }))
            .build();
        self.append(entry).await;
    }

    /// Log an event from a user outside the allow-list.
    pub async fn log_authorization_denied(&self, user_id: &str) {
        let entry = self
            .entry(
                AuditEntryKind::AuthorizationDenied,
                user_id,
                "authorize",
                ActionCategory::System,
            )
            .error("user is not an operator")
            .build();
        self.append(entry).await;
    }

    /// Query entries, newest first, capped at the configured page size.
    pub async fn query(&self, mut filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let cap = self.config.page_cap;
        filter.limit = Some(filter.limit.map_or(cap, |l| l.min(cap)));
        self.storage.query(&filter).await
    }

    /// Usage statistics over a time range, computed by scanning entries.
    pub async fn aggregate(&self, range: TimeRange) -> Result<UsageStats, AuditError> {
        let filter = AuditFilter {
            start_time: range.start,
            end_time: range.end,
            ..Default::default()
        };
        let entries = self.storage.query(&filter).await?;
        Ok(UsageStats::from_entries(range, &entries))
    }

    /// Entries in a range, oldest first, for export.
    pub async fn export(&self, range: TimeRange) -> Result<Vec<AuditEntry>, AuditError> {
        let filter = AuditFilter {
            start_time: range.start,
            end_time: range.end,
            limit: Some(EXPORT_CAP),
            ..Default::default()
        };
        let mut entries = self.storage.query(&filter).await?;
        entries.reverse();
        Ok(entries)
    }

    /// Delete entries older than the retention horizon.
    pub async fn sweep(&self, older_than_days: u32) -> Result<usize, AuditError> {
        let cutoff = self.clock.now() - Duration::days(i64::from(older_than_days));
        let removed = self.storage.remove_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, older_than_days, "Swept audit entries");
        }
        Ok(removed)
    }

    /// Retention sweep with the configured horizon.
    pub async fn sweep_retention(&self) -> Result<usize, AuditError> {
        self.sweep(self.config.retention_days).await
    }

    /// Current time according to the logger's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Filter for querying audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by action name substring (case-insensitive).
    pub action: Option<String>,
    /// Filter by category.
    pub category: Option<ActionCategory>,
    /// Filter by entry kind.
    pub kind: Option<AuditEntryKind>,
    /// Filter by start time (inclusive).
    pub start_time: Option<DateTime<Utc>>,
    /// Filter by end time (inclusive).
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Whether an entry passes every set criterion.
    pub fn matches(&self, e: &AuditEntry) -> bool {
        if let Some(ref user) = self.user_id {
            if &e.user_id != user {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if !e.action.to_lowercase().contains(&action.to_lowercase()) {
                return false;
            }
        }
        if let Some(category) = self.category {
            if e.category != category {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if e.kind != kind {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if e.occurred_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if e.occurred_at > end {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use steward_core::ManualClock;
    use steward_store::MemoryStore;

    fn store_logger(clock: Arc<ManualClock>, page_cap: usize) -> AuditLogger {
        let config = AuditConfig {
            page_cap,
            ..Default::default()
        };
        AuditLogger::new(config, Arc::new(MemoryStore::new()), clock).unwrap()
    }

    struct BrokenStorage;

    #[async_trait]
    impl AuditStorage for BrokenStorage {
        async fn store(&self, _entry: AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::QueryFailed("disk full".to_string()))
        }
        async fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
            Err(AuditError::QueryFailed("disk full".to_string()))
        }
        async fn remove_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_disabled_logger() {
        let logger = AuditLogger::disabled();
        assert!(!logger.is_enabled());

        logger
            .log_action_attempted(
                "1",
                "help",
                ActionCategory::System,
                &serde_json::json!({}),
                serde_json::Value::Null,
                "c",
            )
            .await;
    }

    #[tokio::test]
    async fn test_append_never_raises() {
        let logger = AuditLogger::with_storage(
            AuditConfig::default(),
            Arc::new(BrokenStorage),
            SystemClock::shared(),
        );

        // Returns unit even though the backend fails.
        logger.log_authorization_denied("intruder").await;
    }

    #[tokio::test]
    async fn test_query_filters_and_caps() {
        let clock = Arc::new(ManualClock::starting_now());
        let logger = store_logger(clock.clone(), 2);

        for action in ["list_orders", "get_order", "delete_product"] {
            logger
                .log_action_succeeded("1", action, ActionCategory::Order, 5, "c")
                .await;
            clock.advance(Duration::seconds(1));
        }
        logger
            .log_action_succeeded("2", "list_orders", ActionCategory::Order, 5, "c")
            .await;

        let capped = logger.query(AuditFilter::default()).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].user_id, "2");

        let orders = logger
            .query(AuditFilter {
                user_id: Some("1".to_string()),
                action: Some("ORDER".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].action, "get_order");
    }

    #[tokio::test]
    async fn test_sweep_uses_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let logger = store_logger(clock.clone(), 100);

        logger
            .log_action_succeeded("1", "help", ActionCategory::System, 1, "c")
            .await;
        clock.advance(Duration::days(31));
        logger
            .log_action_succeeded("1", "help", ActionCategory::System, 1, "c")
            .await;

        assert_eq!(logger.sweep(30).await.unwrap(), 1);
        assert_eq!(logger.query(AuditFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            backend: AuditBackend::File,
            directory: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let logger =
            AuditLogger::new(config, Arc::new(MemoryStore::new()), SystemClock::shared()).unwrap();

        logger.log_rate_limited("9", 30).await;
        assert!(dir.path().join("audit.log").exists());

        let entries = logger.query(AuditFilter::default()).await.unwrap();
        assert_eq!(entries[0].kind, AuditEntryKind::RateLimited);
        assert!(!entries[0].success);
    }
}
