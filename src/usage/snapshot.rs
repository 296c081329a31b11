//! Point-in-time usage records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::tiers::Resource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub storage_used_mb: u64,
    pub tokens_used: u64,
    pub documents_uploaded: u64,
}

impl UsageCounters {
    pub fn new(storage_used_mb: u64, tokens_used: u64, documents_uploaded: u64) -> Self {
        Self {
            storage_used_mb,
            tokens_used,
            documents_uploaded,
        }
    }

    pub fn get(&self, resource: Resource) -> u64 {
        match resource {
            Resource::Storage => self.storage_used_mb,
            Resource::Tokens => self.tokens_used,
            Resource::Documents => self.documents_uploaded,
        }
    }

    fn slot(&mut self, resource: Resource) -> &mut u64 {
        match resource {
            Resource::Storage => &mut self.storage_used_mb,
            Resource::Tokens => &mut self.tokens_used,
            Resource::Documents => &mut self.documents_uploaded,
        }
    }

    /// Apply a signed delta, flooring at zero. Returns `true` if the floor clipped it.
    pub(crate) fn apply(&mut self, resource: Resource, delta: i64) -> bool {
        let slot = self.slot(resource);
        if delta >= 0 {
            *slot = slot.saturating_add(delta as u64);
            false
        } else {
            let release = delta.unsigned_abs();
            let clipped = release > *slot;
            *slot = slot.saturating_sub(release);
            clipped
        }
    }

    pub(crate) fn set(&mut self, resource: Resource, value: u64) {
        *self.slot(resource) = value;
    }

    /// Counters after applying `delta` to `resource`, without mutating `self`.
    pub fn projected(&self, resource: Resource, delta: i64) -> u64 {
        let mut copy = *self;
        copy.apply(resource, delta);
        copy.get(resource)
    }
}

/// Read-only copy of a subscriber's usage for the current billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub subscriber_id: String,
    pub tier_id: String,
    pub period_start: DateTime<Utc>,
    pub counters: UsageCounters,
    pub last_updated: DateTime<Utc>,
    /// Bumped on every mutation; orders snapshots of one subscriber.
    pub revision: u64,
    /// Set when a downgrade was accepted while over the new tier's limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_until: Option<NaiveDate>,
}

impl UsageSnapshot {
    pub(crate) fn new(
        subscriber_id: impl Into<String>,
        tier_id: impl Into<String>,
        period_start: DateTime<Utc>,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            tier_id: tier_id.into(),
            period_start,
            counters: UsageCounters::default(),
            last_updated: Utc::now(),
            revision: 0,
            grace_until: None,
        }
    }

    pub fn used(&self, resource: Resource) -> u64 {
        self.counters.get(resource)
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        self.last_updated = Utc::now();
    }
}
