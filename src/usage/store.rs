//! Per-subscriber usage counters.
//!
//! `UsageStore` is the only place counters change. Each subscriber has its own
//! lock; there is no store-wide lock beyond the sharded map lookup.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use super::snapshot::{UsageCounters, UsageSnapshot};
use crate::tiers::Resource;
use crate::{Error, Result};

/// Outcome of an admission check evaluated under the subscriber lock.
pub trait Admission {
    fn admitted(&self) -> bool;
}

/// Result of [`UsageStore::commit_checked`].
#[derive(Debug, Clone)]
pub struct CheckedCommit<T> {
    pub outcome: T,
    /// Present only when the check admitted the change and it was applied.
    pub snapshot: Option<UsageSnapshot>,
}

type Account = Arc<RwLock<UsageSnapshot>>;

#[derive(Debug, Clone, Default)]
pub struct UsageStore {
    accounts: Arc<DashMap<String, Account>>,
}

impl UsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn account(&self, subscriber_id: &str) -> Result<Account> {
        self.accounts
            .get(subscriber_id)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| Error::SubscriberNotFound {
                subscriber_id: subscriber_id.to_string(),
            })
    }

    fn write<T>(
        &self,
        subscriber_id: &str,
        f: impl FnOnce(&mut UsageSnapshot) -> Result<T>,
    ) -> Result<T> {
        let account = self.account(subscriber_id)?;
        let mut guard = account.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Start a billing period for a subscriber (activation or renewal).
    ///
    /// Replaces any existing record wholesale.
    pub fn open(
        &self,
        subscriber_id: impl Into<String>,
        tier_id: impl Into<String>,
        period_start: DateTime<Utc>,
    ) -> UsageSnapshot {
        let subscriber_id = subscriber_id.into();
        let snapshot = UsageSnapshot::new(subscriber_id.clone(), tier_id, period_start);
        self.accounts
            .insert(subscriber_id, Arc::new(RwLock::new(snapshot.clone())));
        snapshot
    }

    /// Restore a previously captured snapshot, e.g. from the local cache.
    pub fn restore(&self, snapshot: UsageSnapshot) {
        self.accounts.insert(
            snapshot.subscriber_id.clone(),
            Arc::new(RwLock::new(snapshot)),
        );
    }

    pub fn contains(&self, subscriber_id: &str) -> bool {
        self.accounts.contains_key(subscriber_id)
    }

    pub fn remove(&self, subscriber_id: &str) -> Option<UsageSnapshot> {
        self.accounts
            .remove(subscriber_id)
            .map(|(_, a)| a.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.accounts.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get(&self, subscriber_id: &str) -> Result<UsageSnapshot> {
        let account = self.account(subscriber_id)?;
        let snapshot = account.read().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(snapshot)
    }

    /// Apply a signed delta to one counter, flooring at zero.
    pub fn commit(&self, subscriber_id: &str, resource: Resource, delta: i64) -> Result<UsageSnapshot> {
        self.write(subscriber_id, |snapshot| {
            apply_deltas(snapshot, &[(resource, delta)]);
            Ok(snapshot.clone())
        })
    }

    /// Evaluate `check` and apply `deltas` under one subscriber lock.
    ///
    /// Deltas are applied only when the check admits them, so no other commit
    /// can interleave between the decision and the mutation.
    pub fn commit_checked<T: Admission>(
        &self,
        subscriber_id: &str,
        deltas: &[(Resource, i64)],
        check: impl FnOnce(&UsageSnapshot) -> Result<T>,
    ) -> Result<CheckedCommit<T>> {
        self.write(subscriber_id, |snapshot| {
            let outcome = check(snapshot)?;
            if !outcome.admitted() {
                return Ok(CheckedCommit {
                    outcome,
                    snapshot: None,
                });
            }
            apply_deltas(snapshot, deltas);
            Ok(CheckedCommit {
                outcome,
                snapshot: Some(snapshot.clone()),
            })
        })
    }

    /// Overwrite counters with authoritative server values.
    pub fn reconcile(&self, subscriber_id: &str, counters: UsageCounters) -> Result<UsageSnapshot> {
        self.write(subscriber_id, |snapshot| {
            if snapshot.counters != counters {
                tracing::debug!(
                    subscriber_id,
                    local = ?snapshot.counters,
                    server = ?counters,
                    "Reconciled usage with server"
                );
            }
            snapshot.counters = counters;
            snapshot.touch();
            Ok(snapshot.clone())
        })
    }

    /// Overwrite a single counter with an authoritative server value.
    pub fn reconcile_resource(
        &self,
        subscriber_id: &str,
        resource: Resource,
        value: u64,
    ) -> Result<UsageSnapshot> {
        self.write(subscriber_id, |snapshot| {
            snapshot.counters.set(resource, value);
            snapshot.touch();
            Ok(snapshot.clone())
        })
    }

    /// Overwrite only the reported counters, under one lock.
    pub fn reconcile_partial(
        &self,
        subscriber_id: &str,
        values: &[(Resource, u64)],
    ) -> Result<UsageSnapshot> {
        self.write(subscriber_id, |snapshot| {
            let mut counters = snapshot.counters;
            for &(resource, value) in values {
                counters.set(resource, value);
            }
            if snapshot.counters != counters {
                tracing::debug!(
                    subscriber_id,
                    local = ?snapshot.counters,
                    server = ?counters,
                    "Reconciled usage with server"
                );
            }
            snapshot.counters = counters;
            snapshot.touch();
            Ok(snapshot.clone())
        })
    }

    /// Zero all counters for a new billing period.
    pub fn rollover(&self, subscriber_id: &str, period_start: DateTime<Utc>) -> Result<UsageSnapshot> {
        self.write(subscriber_id, |snapshot| {
            tracing::info!(subscriber_id, %period_start, "Billing period rollover");
            snapshot.counters = UsageCounters::default();
            snapshot.period_start = period_start;
            snapshot.grace_until = None;
            snapshot.touch();
            Ok(snapshot.clone())
        })
    }

    /// Switch the subscriber's effective tier. Counters are left untouched.
    pub fn set_tier(
        &self,
        subscriber_id: &str,
        tier_id: impl Into<String>,
        grace_until: Option<NaiveDate>,
    ) -> Result<UsageSnapshot> {
        let tier_id = tier_id.into();
        self.write(subscriber_id, move |snapshot| {
            snapshot.tier_id = tier_id;
            snapshot.grace_until = grace_until;
            snapshot.touch();
            Ok(snapshot.clone())
        })
    }

    /// Clear the grace window if it still ends on `until`.
    ///
    /// Returns `false` when another caller already closed or replaced it.
    pub fn close_grace(&self, subscriber_id: &str, until: NaiveDate) -> Result<bool> {
        self.write(subscriber_id, |snapshot| {
            if snapshot.grace_until != Some(until) {
                return Ok(false);
            }
            snapshot.grace_until = None;
            snapshot.touch();
            Ok(true)
        })
    }
}

fn apply_deltas(snapshot: &mut UsageSnapshot, deltas: &[(Resource, i64)]) {
    for &(resource, delta) in deltas {
        if snapshot.counters.apply(resource, delta) {
            tracing::warn!(
                subscriber_id = %snapshot.subscriber_id,
                %resource,
                delta,
                "Release exceeded recorded usage; counter floored at zero"
            );
        }
    }
    snapshot.touch();
    tracing::debug!(
        subscriber_id = %snapshot.subscriber_id,
        revision = snapshot.revision,
        counters = ?snapshot.counters,
        "Usage committed"
    );
}
