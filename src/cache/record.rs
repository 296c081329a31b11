use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::{NotificationDispatcher, SeverityState};
use crate::tiers::Resource;
use crate::usage::{Severity, UsageCounters, UsageSnapshot, UsageStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUsage {
    pub storage_mb: u64,
    pub tokens: u64,
    pub documents: u64,
}

impl From<UsageCounters> for CachedUsage {
    fn from(c: UsageCounters) -> Self {
        Self {
            storage_mb: c.storage_used_mb,
            tokens: c.tokens_used,
            documents: c.documents_uploaded,
        }
    }
}

impl From<CachedUsage> for UsageCounters {
    fn from(c: CachedUsage) -> Self {
        UsageCounters::new(c.storage_mb, c.tokens, c.documents)
    }
}

/// One subscriber's cached state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub subscriber_id: String,
    pub tier_id: String,
    pub period_start: DateTime<Utc>,
    pub usage: CachedUsage,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub last_notified_severity: BTreeMap<Resource, Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_until: Option<NaiveDate>,
}

impl CacheRecord {
    pub fn capture(snapshot: &UsageSnapshot, severity: Option<&SeverityState>) -> Self {
        // Dedupe state from another period must not suppress this period's alerts.
        let last_notified_severity = severity
            .filter(|s| s.period_start == Some(snapshot.period_start))
            .map(|s| s.last_notified.clone())
            .unwrap_or_default();

        Self {
            subscriber_id: snapshot.subscriber_id.clone(),
            tier_id: snapshot.tier_id.clone(),
            period_start: snapshot.period_start,
            usage: snapshot.counters.into(),
            last_updated: snapshot.last_updated,
            last_notified_severity,
            grace_until: snapshot.grace_until,
        }
    }

    pub fn to_snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            subscriber_id: self.subscriber_id.clone(),
            tier_id: self.tier_id.clone(),
            period_start: self.period_start,
            counters: self.usage.into(),
            last_updated: self.last_updated,
            revision: 0,
            grace_until: self.grace_until,
        }
    }

    pub fn severity_state(&self) -> SeverityState {
        SeverityState {
            period_start: Some(self.period_start),
            revision: 0,
            current: self.last_notified_severity.clone(),
            last_notified: self.last_notified_severity.clone(),
        }
    }

    /// Seed the store and dispatcher so a restart neither loses usage nor re-alerts.
    pub fn restore_into(&self, store: &UsageStore, dispatcher: &NotificationDispatcher) {
        store.restore(self.to_snapshot());
        dispatcher.restore_state(self.subscriber_id.clone(), self.severity_state());
        tracing::debug!(
            subscriber_id = %self.subscriber_id,
            tier_id = %self.tier_id,
            "Restored usage from local cache"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let record = CacheRecord {
            subscriber_id: "sub-1".into(),
            tier_id: "basic".into(),
            period_start: "2024-06-01T00:00:00Z".parse().unwrap(),
            usage: CachedUsage {
                storage_mb: 650,
                tokens: 1200,
                documents: 4,
            },
            last_updated: "2024-06-15T12:00:00Z".parse().unwrap(),
            last_notified_severity: BTreeMap::from([(Resource::Storage, Severity::Caution)]),
            grace_until: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tier_id"], "basic");
        assert_eq!(value["usage"]["storage_mb"], 650);
        assert_eq!(value["last_notified_severity"]["storage"], "caution");
        assert!(value.get("grace_until").is_none());
    }

    #[test]
    fn test_capture_drops_other_period_state() {
        let store = UsageStore::new();
        let snapshot = store.open("sub-1", "basic", Utc::now());
        let stale = SeverityState {
            period_start: Some("2020-01-01T00:00:00Z".parse().unwrap()),
            last_notified: BTreeMap::from([(Resource::Tokens, Severity::Critical)]),
            ..Default::default()
        };

        let record = CacheRecord::capture(&snapshot, Some(&stale));
        assert!(record.last_notified_severity.is_empty());
    }
}
