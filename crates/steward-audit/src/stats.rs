//! Usage aggregation over audit entries.
//!
//! Statistics are derived by scanning entries; there is no materialised view.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use steward_core::ActionCategory;

use crate::entry::{AuditEntry, AuditEntryKind};

/// How many users/actions the "most active" lists keep.
const TOP_N: usize = 5;

/// Inclusive time range. An unset bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The last `days` days up to `now`.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        Self::new(now - Duration::days(i64::from(days)), now)
    }

    /// Unbounded on both ends.
    pub fn all() -> Self {
        Self::default()
    }
}

/// A name and how many times it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranked {
    pub name: String,
    pub count: usize,
}

/// Classifier health over a range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub attempts: usize,
    pub succeeded: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

/// Aggregated usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub range: TimeRange,
    /// Dispatched actions (succeeded + failed).
    pub total_actions: usize,
    pub distinct_users: usize,
    pub per_category: BTreeMap<ActionCategory, usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub top_users: Vec<Ranked>,
    pub top_actions: Vec<Ranked>,
    pub classification: ClassificationStats,
}

impl UsageStats {
    /// Aggregate a set of entries. Only entries inside `range` count.
    pub fn from_entries(range: TimeRange, entries: &[AuditEntry]) -> Self {
        let in_range = |e: &&AuditEntry| {
            range.start.is_none_or(|s| e.occurred_at >= s)
                && range.end.is_none_or(|end| e.occurred_at <= end)
        };

        let mut stats = UsageStats {
            range,
            ..Default::default()
        };
        let mut users = HashSet::new();
        let mut by_user: HashMap<&str, usize> = HashMap::new();
        let mut by_action: HashMap<&str, usize> = HashMap::new();
        let mut latency_total = 0u64;
        let mut latency_count = 0usize;
        let mut classify_latency = 0u64;

        for entry in entries.iter().filter(in_range) {
            if entry.kind == AuditEntryKind::ClassificationAttempt {
                stats.classification.attempts += 1;
                if entry.success {
                    stats.classification.succeeded += 1;
                }
                classify_latency += entry.duration_ms.unwrap_or(0);
                continue;
            }

            if !entry.kind.is_action_outcome() {
                continue;
            }

            stats.total_actions += 1;
            users.insert(entry.user_id.as_str());
            *stats.per_category.entry(entry.category).or_insert(0) += 1;
            *by_user.entry(entry.user_id.as_str()).or_insert(0) += 1;
            *by_action.entry(entry.action.as_str()).or_insert(0) += 1;

            if entry.success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }

            if let Some(ms) = entry.duration_ms {
                latency_total += ms;
                latency_count += 1;
            }
        }

        stats.distinct_users = users.len();
        if stats.total_actions > 0 {
            stats.success_rate = stats.succeeded as f64 / stats.total_actions as f64;
            stats.error_rate = stats.failed as f64 / stats.total_actions as f64;
        }
        if latency_count > 0 {
            stats.avg_latency_ms = latency_total as f64 / latency_count as f64;
        }
        if stats.classification.attempts > 0 {
            let attempts = stats.classification.attempts as f64;
            stats.classification.success_rate = stats.classification.succeeded as f64 / attempts;
            stats.classification.avg_latency_ms = classify_latency as f64 / attempts;
        }

        stats.top_users = top(by_user);
        stats.top_actions = top(by_action);
        stats
    }

    /// Short plain-text summary for the chat surface.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Actions: {} ({} ok, {} failed)\nUsers: {}\nSuccess rate: {:.0}%\nAvg latency: {:.0} ms",
            self.total_actions,
            self.succeeded,
            self.failed,
            self.distinct_users,
            self.success_rate * 100.0,
            self.avg_latency_ms,
        );

        if !self.per_category.is_empty() {
            out.push_str("\n\nBy category:");
            for (category, count) in &self.per_category {
                out.push_str(&format!("\n  {}: {}", category, count));
            }
        }

        if !self.top_actions.is_empty() {
            out.push_str("\n\nTop actions:");
            for ranked in &self.top_actions {
                out.push_str(&format!("\n  {}: {}", ranked.name, ranked.count));
            }
        }

        if !self.top_users.is_empty() {
            out.push_str("\n\nMost active users:");
            for ranked in &self.top_users {
                out.push_str(&format!("\n  {}: {}", ranked.name, ranked.count));
            }
        }

        if self.classification.attempts > 0 {
            out.push_str(&format!(
                "\n\nClassifier: {} attempts, {:.0}% ok, {:.0} ms avg",
                self.classification.attempts,
                self.classification.success_rate * 100.0,
                self.classification.avg_latency_ms,
            ));
        }

        out
    }
}

/// Highest counts first; ties broken by name so output is stable.
fn top(counts: HashMap<&str, usize>) -> Vec<Ranked> {
    let mut ranked: Vec<_> = counts
        .into_iter()
        .map(|(name, count)| Ranked {
            name: name.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(TOP_N);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(user: &str, action: &str, category: ActionCategory, ok: bool, ms: u64) -> AuditEntry {
        let kind = if ok {
            AuditEntryKind::ActionSucceeded
        } else {
            AuditEntryKind::ActionFailed
        };
        let mut builder = AuditEntry::builder(kind, user, action, category).duration_ms(ms);
        if !ok {
            builder = builder.error("boom");
        }
        builder.build()
    }

    #[test]
    fn test_aggregate_counts() {
        let entries = vec![
            outcome("1", "list_orders", ActionCategory::Order, true, 10),
            outcome("1", "list_orders", ActionCategory::Order, true, 20),
            outcome("2", "delete_product", ActionCategory::Product, false, 30),
            AuditEntry::builder(
                AuditEntryKind::ActionAttempted,
                "2",
                "delete_product",
                ActionCategory::Product,
            )
            .build(),
        ];

        let stats = UsageStats::from_entries(TimeRange::all(), &entries);
        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.distinct_users, 2);
        assert_eq!(stats.per_category[&ActionCategory::Order], 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.avg_latency_ms - 20.0).abs() < f64::EPSILON);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.top_users[0].name, "1");
        assert_eq!(stats.top_actions[0].name, "list_orders");
        assert_eq!(stats.top_actions[0].count, 2);
    }

    #[test]
    fn test_classification_stats() {
        let attempt = |ok: bool, ms: u64| {
            let mut b = AuditEntry::builder(
                AuditEntryKind::ClassificationAttempt,
                "1",
                "classify",
                ActionCategory::System,
            )
            .duration_ms(ms);
            if !ok {
                b = b.error("invalid json");
            }
            b.build()
        };

        let stats = UsageStats::from_entries(TimeRange::all(), &[attempt(false, 100), attempt(true, 300)]);
        assert_eq!(stats.total_actions, 0);
        assert_eq!(stats.classification.attempts, 2);
        assert!((stats.classification.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.classification.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_range_excludes_old_entries() {
        let now = Utc::now();
        let mut old = outcome("1", "help", ActionCategory::System, true, 1);
        old.occurred_at = now - Duration::days(10);
        let recent = outcome("1", "help", ActionCategory::System, true, 1);

        let stats = UsageStats::from_entries(TimeRange::last_days(now + Duration::seconds(1), 7), &[old, recent]);
        assert_eq!(stats.total_actions, 1);
        assert!(stats.summary().contains("Actions: 1"));
    }
}
