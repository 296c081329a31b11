//! Admission control against tier limits.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use super::decision::{GraceStatus, ProspectiveAction, QuotaDecision, ResourceDecision};
use crate::notify::{EventBus, GraceExpired, QuotaEvent, QuotaExceeded};
use crate::observability::{QuotaMetrics, SpanContext};
use crate::tiers::{Limit, Resource, Tier, TierCatalog};
use crate::usage::{CheckedCommit, SeverityClassifier, UsageCounters, UsageSnapshot, UsageStore};
use crate::{Error, Result};

/// Result of [`QuotaGuard::admit`]: the decision plus the committed snapshot when allowed.
pub type Admitted = CheckedCommit<QuotaDecision>;

/// Evaluate one prospective change against a tier, without side effects.
///
/// Releases (`amount < 0`) are always allowed, even when usage already sits
/// above the limit. Unlimited resources are always allowed at `Normal`.
pub fn evaluate(
    tier: &Tier,
    counters: &UsageCounters,
    resource: Resource,
    amount: i64,
    classifier: &SeverityClassifier,
) -> ResourceDecision {
    let limit = tier.limit(resource);
    let current_used = counters.get(resource);
    let projected_used = counters.projected(resource, amount);

    let (projected_percentage, projected_severity) = match limit {
        Limit::Unlimited => (0.0, Default::default()),
        Limit::Capped(_) => {
            let pct = limit.percentage(projected_used);
            (pct, classifier.classify(pct))
        }
    };

    let allowed = amount < 0 || limit.allows(projected_used);
    let (reason, message) = if allowed {
        (None, None)
    } else {
        (
            Some(resource.limit_exceeded_reason()),
            Some(denial_message(resource, limit, current_used, amount)),
        )
    };

    ResourceDecision {
        resource,
        allowed,
        reason,
        message,
        limit,
        current_used,
        requested: amount,
        projected_used,
        projected_percentage,
        projected_severity,
    }
}

fn denial_message(resource: Resource, limit: Limit, current: u64, amount: i64) -> String {
    let label = match resource {
        Resource::Storage => "Storage",
        Resource::Tokens => "Token",
        Resource::Documents => "Document",
    };
    let limit = limit
        .capped()
        .map(|max| resource.format_amount(max))
        .unwrap_or_else(|| "unlimited".to_string());
    if amount > 0 {
        format!(
            "{} limit exceeded: {} of {} used, {} requested",
            label,
            resource.format_amount(current),
            limit,
            resource.format_amount(amount.unsigned_abs())
        )
    } else {
        format!(
            "{} limit exceeded: {} of {} used",
            label,
            resource.format_amount(current),
            limit
        )
    }
}

/// Sum amounts per resource so repeated entries are checked as one change.
fn aggregate(actions: &[ProspectiveAction]) -> Vec<(Resource, i64)> {
    let mut totals: BTreeMap<Resource, i64> = BTreeMap::new();
    for action in actions {
        let total = totals.entry(action.resource).or_default();
        *total = total.saturating_add(action.amount);
    }
    totals.into_iter().collect()
}

/// Decides whether resource-consuming actions fit the subscriber's tier.
///
/// Checks are read-only; [`admit`](Self::admit) is the only path that both
/// decides and commits, under the subscriber's lock.
#[derive(Debug, Clone)]
pub struct QuotaGuard {
    catalog: Arc<TierCatalog>,
    store: UsageStore,
    classifier: SeverityClassifier,
    events: Option<EventBus>,
    metrics: Arc<QuotaMetrics>,
}

impl QuotaGuard {
    pub fn new(catalog: Arc<TierCatalog>, store: UsageStore, classifier: SeverityClassifier) -> Self {
        Self {
            catalog,
            store,
            classifier,
            events: None,
            metrics: Arc::new(QuotaMetrics::new()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<QuotaMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &UsageStore {
        &self.store
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    pub fn classifier(&self) -> &SeverityClassifier {
        &self.classifier
    }

    /// Resolve the snapshot's tier, failing closed when the catalog lacks it.
    fn tier_for(&self, snapshot: &UsageSnapshot) -> Result<&Tier> {
        self.catalog.get(&snapshot.tier_id).map_err(|e| {
            self.metrics.integrity_failures.inc();
            tracing::error!(
                subscriber_id = %snapshot.subscriber_id,
                tier_id = %snapshot.tier_id,
                "Subscriber references unknown tier; denying"
            );
            Error::InvariantViolation(e.to_string())
        })
    }

    fn decide(&self, snapshot: &UsageSnapshot, deltas: &[(Resource, i64)]) -> Result<QuotaDecision> {
        let tier = self.tier_for(snapshot)?;
        let resources = deltas
            .iter()
            .map(|&(resource, amount)| {
                evaluate(tier, &snapshot.counters, resource, amount, &self.classifier)
            })
            .collect();
        Ok(QuotaDecision::from_resources(resources))
    }

    /// Would `amount` of `resource` fit? Never mutates state.
    ///
    /// Reads share the subscriber's lock with other readers and never wait on
    /// other subscribers. A read that arrives during a commit waits for that
    /// one in-memory update to finish; no writer holds the lock across I/O or
    /// an `.await`.
    pub fn can_perform_action(
        &self,
        subscriber_id: &str,
        resource: Resource,
        amount: i64,
    ) -> Result<ResourceDecision> {
        let snapshot = self.store.get(subscriber_id)?;
        let tier = self.tier_for(&snapshot)?;
        Ok(evaluate(
            tier,
            &snapshot.counters,
            resource,
            amount,
            &self.classifier,
        ))
    }

    /// Check several resources at once; allowed only if every resource is.
    ///
    /// Locking as for [`can_perform_action`](Self::can_perform_action).
    pub fn can_perform_actions(
        &self,
        subscriber_id: &str,
        actions: &[ProspectiveAction],
    ) -> Result<QuotaDecision> {
        let snapshot = self.store.get(subscriber_id)?;
        self.decide(&snapshot, &aggregate(actions))
    }

    /// Check and commit atomically.
    ///
    /// When every resource is allowed the deltas are applied and the new
    /// snapshot returned; otherwise nothing changes and a `QuotaExceeded`
    /// event is emitted per denied resource.
    pub fn admit(&self, subscriber_id: &str, actions: &[ProspectiveAction]) -> Result<Admitted> {
        let deltas = aggregate(actions);
        let resources: Vec<Resource> = deltas.iter().map(|(r, _)| *r).collect();
        let span = SpanContext::new(subscriber_id).admit_span(&resources);
        let _enter = span.enter();

        let committed = self
            .store
            .commit_checked(subscriber_id, &deltas, |snapshot| {
                self.decide(snapshot, &deltas)
            })?;

        let decision = &committed.outcome;
        span.record("allowed", decision.allowed);
        if decision.allowed {
            self.metrics.admissions_allowed.inc();
        } else {
            self.metrics.admissions_denied.inc();
            for denied in decision.denied() {
                tracing::info!(
                    subscriber_id,
                    resource = %denied.resource,
                    current = denied.current_used,
                    requested = denied.requested,
                    "Action denied by quota"
                );
                if let Some(events) = &self.events {
                    events.emit(QuotaEvent::QuotaExceeded(QuotaExceeded {
                        subscriber_id: subscriber_id.to_string(),
                        resource: denied.resource,
                        reason: denied.reason.clone().unwrap_or_default(),
                        message: denied.message.clone().unwrap_or_default(),
                        limit: denied.limit.capped().unwrap_or(u64::MAX),
                        current: denied.current_used,
                        requested: denied.requested,
                    }));
                }
            }
        }

        Ok(committed)
    }

    /// Current usage evaluated against `target`, as if switching tiers now.
    pub fn review_against(&self, snapshot: &UsageSnapshot, target: &Tier) -> Vec<ResourceDecision> {
        Resource::ALL
            .iter()
            .map(|&resource| evaluate(target, &snapshot.counters, resource, 0, &self.classifier))
            .collect()
    }

    /// Settle the subscriber's downgrade grace window as of `today`.
    ///
    /// The window closes early once usage fits the tier again. When `today` is
    /// past `grace_until` and usage is still over a limit, the window is closed
    /// and a [`GraceExpired`] event is emitted; later calls report `Inactive`.
    pub fn enforce_grace(&self, subscriber_id: &str, today: NaiveDate) -> Result<GraceStatus> {
        let snapshot = self.store.get(subscriber_id)?;
        let Some(until) = snapshot.grace_until else {
            return Ok(GraceStatus::Inactive);
        };
        let tier = self.tier_for(&snapshot)?;
        let over_limit: Vec<Resource> = self
            .review_against(&snapshot, tier)
            .into_iter()
            .filter(|d| !d.allowed)
            .map(|d| d.resource)
            .collect();

        if over_limit.is_empty() {
            if self.store.close_grace(subscriber_id, until)? {
                tracing::info!(subscriber_id, %until, "Usage back within limits; grace period closed");
            }
            return Ok(GraceStatus::Resolved);
        }
        if today <= until {
            return Ok(GraceStatus::Active { until, over_limit });
        }

        if self.store.close_grace(subscriber_id, until)? {
            self.metrics.grace_expirations.inc();
            tracing::warn!(
                subscriber_id,
                tier_id = %snapshot.tier_id,
                %until,
                over_limit = ?over_limit,
                "Grace period expired with usage over limit"
            );
            if let Some(events) = &self.events {
                events.emit(QuotaEvent::GraceExpired(GraceExpired {
                    subscriber_id: subscriber_id.to_string(),
                    tier_id: snapshot.tier_id.clone(),
                    grace_until: until,
                    over_limit: over_limit.clone(),
                }));
            }
        }
        Ok(GraceStatus::Expired { until, over_limit })
    }
}
