//! Severity transition tracking and alert deduplication.
//!
//! Alerts fire only when a resource escalates past the last severity already
//! notified in the current billing period. Decreases are recorded silently so a
//! later re-crossing fires again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{EventBus, QuotaEvent, UsageAlert};
use crate::observability::QuotaMetrics;
use crate::tiers::{Resource, Tier, TierCatalog};
use crate::usage::{Severity, SeverityClassifier, UsageSnapshot};
use crate::{Error, Result};

/// Per-subscriber dedupe state, scoped to one billing period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityState {
    pub period_start: Option<DateTime<Utc>>,
    /// Revision of the newest snapshot observed.
    pub revision: u64,
    #[serde(default)]
    pub current: BTreeMap<Resource, Severity>,
    #[serde(default)]
    pub last_notified: BTreeMap<Resource, Severity>,
}

impl SeverityState {
    pub fn last_notified(&self, resource: Resource) -> Severity {
        self.last_notified.get(&resource).copied().unwrap_or_default()
    }

    pub fn current(&self, resource: Resource) -> Severity {
        self.current.get(&resource).copied().unwrap_or_default()
    }

    fn reset(&mut self, period_start: DateTime<Utc>) {
        *self = Self {
            period_start: Some(period_start),
            ..Default::default()
        };
    }
}

pub struct NotificationDispatcher {
    catalog: Arc<TierCatalog>,
    classifier: SeverityClassifier,
    bus: EventBus,
    states: DashMap<String, Arc<Mutex<SeverityState>>>,
    metrics: Arc<QuotaMetrics>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("classifier", &self.classifier)
            .field("subscribers", &self.states.len())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(catalog: Arc<TierCatalog>, classifier: SeverityClassifier, bus: EventBus) -> Self {
        Self {
            catalog,
            classifier,
            bus,
            states: DashMap::new(),
            metrics: Arc::new(QuotaMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<QuotaMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn state_handle(&self, subscriber_id: &str) -> Arc<Mutex<SeverityState>> {
        Arc::clone(
            self.states
                .entry(subscriber_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Classify every resource in `snapshot` and emit alerts for upward transitions.
    ///
    /// Call after each successful commit. Snapshots from an earlier billing
    /// period, or older than one already observed in the current period, are
    /// ignored. A snapshot from a later period starts that period afresh.
    pub fn observe(&self, snapshot: &UsageSnapshot) -> Result<Vec<UsageAlert>> {
        let tier = self.catalog.get(&snapshot.tier_id).map_err(|e| {
            tracing::error!(
                subscriber_id = %snapshot.subscriber_id,
                tier_id = %snapshot.tier_id,
                "Snapshot references unknown tier"
            );
            Error::InvariantViolation(e.to_string())
        })?;

        let handle = self.state_handle(&snapshot.subscriber_id);
        let mut state = handle.lock().unwrap_or_else(|e| e.into_inner());

        match state.period_start {
            Some(period) if snapshot.period_start < period => {
                tracing::debug!(
                    subscriber_id = %snapshot.subscriber_id,
                    period_start = %snapshot.period_start,
                    current_period = %period,
                    "Ignoring snapshot from an earlier billing period"
                );
                return Ok(Vec::new());
            }
            Some(period) if snapshot.period_start == period => {
                if snapshot.revision < state.revision {
                    tracing::debug!(
                        subscriber_id = %snapshot.subscriber_id,
                        revision = snapshot.revision,
                        seen = state.revision,
                        "Ignoring stale snapshot"
                    );
                    return Ok(Vec::new());
                }
            }
            _ => state.reset(snapshot.period_start),
        }
        state.revision = snapshot.revision;

        let mut alerts = Vec::new();
        for resource in Resource::ALL {
            let used = snapshot.used(resource);
            let percentage = tier.limit(resource).percentage(used);
            let severity = self.classifier.classify(percentage);
            let last = state.last_notified(resource);

            state.current.insert(resource, severity);
            if severity > last {
                state.last_notified.insert(resource, severity);
                alerts.push(UsageAlert {
                    id: Uuid::new_v4(),
                    subscriber_id: snapshot.subscriber_id.clone(),
                    resource,
                    severity,
                    percentage,
                    message: alert_message(tier, resource, severity, percentage, used),
                    emitted_at: Utc::now(),
                });
            } else if severity < last {
                state.last_notified.insert(resource, severity);
            }
        }
        drop(state);

        for alert in &alerts {
            tracing::info!(
                subscriber_id = %alert.subscriber_id,
                resource = %alert.resource,
                severity = %alert.severity,
                percentage = alert.percentage,
                "Usage alert"
            );
            self.metrics.alerts_emitted.inc();
            self.bus.emit(QuotaEvent::UsageAlert(alert.clone()));
        }

        Ok(alerts)
    }

    pub fn state(&self, subscriber_id: &str) -> Option<SeverityState> {
        self.states
            .get(subscriber_id)
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Seed dedupe state, e.g. from the local cache, so restarts do not re-alert.
    pub fn restore_state(&self, subscriber_id: impl Into<String>, state: SeverityState) {
        self.states
            .insert(subscriber_id.into(), Arc::new(Mutex::new(state)));
    }

    /// Start a billing period with empty dedupe state.
    ///
    /// Late snapshots from any earlier period are ignored from here on.
    pub fn begin_period(&self, subscriber_id: &str, period_start: DateTime<Utc>) {
        let handle = self.state_handle(subscriber_id);
        handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset(period_start);
    }
}

fn alert_message(
    tier: &Tier,
    resource: Resource,
    severity: Severity,
    percentage: f64,
    used: u64,
) -> String {
    let limit = tier
        .limit(resource)
        .capped()
        .map(|max| resource.format_amount(max))
        .unwrap_or_else(|| "unlimited".to_string());
    let lead = match severity {
        Severity::Critical => "almost out of",
        Severity::Warning => "running low on",
        Severity::Caution | Severity::Normal => "approaching the limit for",
    };
    format!(
        "Your {} plan is {} {}: {:.1}% used ({} of {})",
        tier.name,
        lead,
        resource,
        percentage,
        resource.format_amount(used),
        limit
    )
}
