//! Plan selection through backend commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};

use super::OverLimitPolicy;
use super::review::{ChangeReview, resource_warnings};
use super::state::{Acknowledgements, WorkflowState};
use crate::backend::{SubscribeRequest, Subscription, SubscriptionBackend};
use crate::billing::ProrationCalculator;
use crate::config::DEFAULT_APPLY_TIMEOUT;
use crate::notify::{EventBus, QuotaEvent, TierChanged};
use crate::observability::{QuotaMetrics, SpanContext};
use crate::quota::QuotaGuard;
use crate::tiers::BillingCycle;
use crate::{Error, Result};

/// Resets `Applying` to a retryable `Error` if the apply future is dropped
/// before it settles.
struct ApplyingGuard<'a> {
    state: &'a mut WorkflowState,
    metrics: &'a QuotaMetrics,
}

impl<'a> ApplyingGuard<'a> {
    fn enter(state: &'a mut WorkflowState, metrics: &'a QuotaMetrics) -> Self {
        *state = WorkflowState::Applying;
        metrics.workflows_applying.inc();
        Self { state, metrics }
    }

    fn settle(self, next: WorkflowState) {
        *self.state = next;
    }
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.metrics.workflows_applying.dec();
        if *self.state == WorkflowState::Applying {
            tracing::warn!("Tier change cancelled while applying");
            *self.state = WorkflowState::Error {
                message: "Tier change was cancelled before the backend confirmed it".into(),
                retryable: true,
            };
        }
    }
}

/// One subscriber's tier change.
///
/// The workflow never retries a backend call on its own; every attempt needs a
/// fresh [`confirm`](Self::confirm) with acknowledgements.
pub struct TierChangeWorkflow {
    subscriber_id: String,
    guard: QuotaGuard,
    backend: Arc<dyn SubscriptionBackend>,
    proration: ProrationCalculator,
    policy: OverLimitPolicy,
    apply_timeout: Duration,
    events: Option<EventBus>,
    metrics: Arc<QuotaMetrics>,
    effective_date: Option<NaiveDate>,
    state: WorkflowState,
    review: Option<ChangeReview>,
    subscription: Option<Subscription>,
}

impl TierChangeWorkflow {
    pub fn new(
        subscriber_id: impl Into<String>,
        guard: QuotaGuard,
        backend: Arc<dyn SubscriptionBackend>,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            guard,
            backend,
            proration: ProrationCalculator::new(),
            policy: OverLimitPolicy::default(),
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
            events: None,
            metrics: Arc::new(QuotaMetrics::new()),
            effective_date: None,
            state: WorkflowState::SelectingPlan,
            review: None,
            subscription: None,
        }
    }

    pub fn with_policy(mut self, policy: OverLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<QuotaMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Pin the proration date instead of using today's UTC date.
    pub fn effective_on(mut self, date: NaiveDate) -> Self {
        self.effective_date = Some(date);
        self
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn review(&self) -> Option<&ChangeReview> {
        self.review.as_ref()
    }

    /// Backend's view of the subscription after a successful change.
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    fn today(&self) -> NaiveDate {
        self.effective_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            from: self.state.name(),
            action,
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = WorkflowState::Error {
            message: err.user_message(),
            retryable: err.is_retryable(),
        };
        err
    }

    /// Choose the target tier and compute the review.
    ///
    /// Unknown or unchanged tiers are validation errors and leave the workflow
    /// in `SelectingPlan`.
    pub fn select_plan(&mut self, tier_id: &str, billing_cycle: BillingCycle) -> Result<&ChangeReview> {
        if self.state != WorkflowState::SelectingPlan {
            return Err(self.invalid("select_plan"));
        }
        let tier_id = tier_id.trim();
        if tier_id.is_empty() {
            return Err(Error::Validation("No plan selected".into()));
        }
        let new_tier = self
            .guard
            .catalog()
            .get(tier_id)
            .map_err(|_| Error::Validation(format!("Unknown plan '{}'", tier_id)))?
            .clone();

        let snapshot = self.guard.store().get(&self.subscriber_id)?;
        if snapshot.tier_id == new_tier.id {
            return Err(Error::Validation(format!(
                "Already subscribed to the {} plan",
                new_tier.name
            )));
        }

        let catalog = self.guard.catalog();
        let resolved = catalog.get(&snapshot.tier_id).and_then(|current| {
            let is_upgrade = catalog.is_upgrade(&current.id, &new_tier.id)?;
            Ok((current.clone(), is_upgrade))
        });
        let (current_tier, is_upgrade) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                self.metrics.integrity_failures.inc();
                tracing::error!(
                    subscriber_id = %self.subscriber_id,
                    tier_id = %snapshot.tier_id,
                    "Subscriber references unknown tier"
                );
                return Err(self.fail(Error::InvariantViolation(e.to_string())));
            }
        };

        let decisions = self.guard.review_against(&snapshot, &new_tier);
        let over_limit = decisions
            .iter()
            .filter(|d| !d.allowed)
            .map(|d| d.resource)
            .collect();
        let warnings = resource_warnings(&current_tier, &new_tier, &decisions, self.policy);
        let proration = self.proration.compute(&current_tier, &new_tier, self.today());

        tracing::debug!(
            subscriber_id = %self.subscriber_id,
            from_tier = %current_tier.id,
            to_tier = %new_tier.id,
            is_upgrade,
            warnings = warnings.len(),
            net_charge = %proration.net_charge,
            "Tier change reviewed"
        );

        let review = ChangeReview {
            lost_features: current_tier.lost_features(&new_tier),
            current_tier,
            new_tier,
            billing_cycle,
            is_upgrade,
            warnings,
            over_limit,
            proration,
        };
        self.state = WorkflowState::ReviewingChanges;
        Ok(self.review.insert(review))
    }

    /// Move to `Confirming`; blocked while the review has any error-level warning.
    pub fn proceed_to_confirm(&mut self) -> Result<()> {
        if self.state != WorkflowState::ReviewingChanges {
            return Err(self.invalid("proceed_to_confirm"));
        }
        let Some(review) = &self.review else {
            return Err(self.invalid("proceed_to_confirm"));
        };
        if review.is_blocked() {
            let reasons: Vec<&str> = review
                .warnings
                .iter()
                .filter(|w| w.severity == super::ReviewSeverity::Error)
                .map(|w| w.message.as_str())
                .collect();
            return Err(Error::Validation(reasons.join("; ")));
        }
        self.state = WorkflowState::Confirming;
        Ok(())
    }

    /// Validate acknowledgements and commit the change through the backend.
    ///
    /// Missing acknowledgements fail locally and leave the workflow in
    /// `Confirming`. Backend failures, timeouts and cancellation land in a
    /// retryable `Error`.
    pub async fn confirm(&mut self, acks: Acknowledgements) -> Result<Subscription> {
        if self.state != WorkflowState::Confirming {
            return Err(self.invalid("confirm"));
        }
        let Some(review) = self.review.clone() else {
            return Err(self.invalid("confirm"));
        };
        if !acks.terms {
            return Err(Error::Validation("Please accept the terms to continue".into()));
        }
        if review.requires_data_loss_ack() && !acks.data_loss {
            return Err(Error::Validation(
                "Please acknowledge the loss of features and data access to continue".into(),
            ));
        }

        let request = SubscribeRequest {
            tier_id: review.new_tier.id.clone(),
            billing_cycle: review.billing_cycle,
            prorate: true,
        };
        let span = SpanContext::new(&self.subscriber_id)
            .tier_change_span(&review.current_tier.id, &review.new_tier.id);

        let guard = ApplyingGuard::enter(&mut self.state, &self.metrics);
        let outcome = tokio::time::timeout(self.apply_timeout, self.backend.subscribe(&request)).await;

        let subscription = match outcome {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                let err = Error::from(e);
                tracing::warn!(
                    subscriber_id = %self.subscriber_id,
                    to_tier = %review.new_tier.id,
                    error = %err,
                    "Tier change rejected"
                );
                guard.settle(WorkflowState::Error {
                    message: err.user_message(),
                    retryable: err.is_retryable(),
                });
                self.metrics.tier_change_failures.inc();
                span.finish("error");
                return Err(err);
            }
            Err(_) => {
                let err = Error::Timeout(self.apply_timeout);
                tracing::warn!(
                    subscriber_id = %self.subscriber_id,
                    to_tier = %review.new_tier.id,
                    timeout_secs = self.apply_timeout.as_secs_f64(),
                    "Tier change timed out"
                );
                guard.settle(WorkflowState::Error {
                    message: err.user_message(),
                    retryable: true,
                });
                self.metrics.tier_change_failures.inc();
                span.finish("timeout");
                return Err(err);
            }
        };

        if subscription.tier_id != review.new_tier.id {
            tracing::warn!(
                subscriber_id = %self.subscriber_id,
                requested = %review.new_tier.id,
                returned = %subscription.tier_id,
                "Backend returned a different tier than requested"
            );
        }

        let effective_date = review.proration.effective_date;
        let grace_until = match self.policy {
            OverLimitPolicy::Grace { days } if review.is_over_limit() => {
                effective_date.checked_add_days(Days::new(u64::from(days)))
            }
            _ => None,
        };

        if let Err(e) = self
            .guard
            .store()
            .set_tier(&self.subscriber_id, review.new_tier.id.clone(), grace_until)
        {
            // The backend already committed; a retry would bill twice.
            tracing::error!(
                subscriber_id = %self.subscriber_id,
                error = %e,
                "Tier committed remotely but local account is missing"
            );
            guard.settle(WorkflowState::Error {
                message: e.user_message(),
                retryable: false,
            });
            self.metrics.tier_change_failures.inc();
            span.finish("error");
            return Err(e);
        }

        guard.settle(WorkflowState::Completed);
        span.finish("completed");
        self.metrics.tier_changes.inc();

        tracing::info!(
            subscriber_id = %self.subscriber_id,
            from_tier = %review.current_tier.id,
            to_tier = %review.new_tier.id,
            is_upgrade = review.is_upgrade,
            ?grace_until,
            "Tier changed"
        );
        if let Some(events) = &self.events {
            events.emit(QuotaEvent::TierChanged(TierChanged {
                subscriber_id: self.subscriber_id.clone(),
                from_tier: review.current_tier.id.clone(),
                to_tier: review.new_tier.id.clone(),
                is_upgrade: review.is_upgrade,
                net_charge: review.proration.net_charge,
                effective_date,
            }));
        }

        self.subscription = Some(subscription.clone());
        Ok(subscription)
    }

    /// Return from a retryable `Error` to `Confirming`. Acknowledgements must be given again.
    pub fn retry(&mut self) -> Result<()> {
        match &self.state {
            WorkflowState::Error {
                retryable: true, ..
            } if self.review.is_some() => {
                self.state = WorkflowState::Confirming;
                Ok(())
            }
            _ => Err(self.invalid("retry")),
        }
    }

    /// Step back one interactive state.
    pub fn back(&mut self) -> Result<()> {
        self.state = match &self.state {
            WorkflowState::ReviewingChanges => {
                self.review = None;
                WorkflowState::SelectingPlan
            }
            WorkflowState::Confirming => WorkflowState::ReviewingChanges,
            WorkflowState::Error { .. } => {
                self.review = None;
                WorkflowState::SelectingPlan
            }
            _ => return Err(self.invalid("back")),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::backend::{BackendError, BackendResult, QuotaStatus};
    use crate::tiers::{Resource, builtin_catalog};
    use crate::usage::{SeverityClassifier, UsageStore};
    use crate::workflow::ReviewSeverity;

    #[derive(Default)]
    struct FakeBackend {
        calls: AtomicUsize,
        reject: Option<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SubscriptionBackend for FakeBackend {
        async fn subscribe(&self, request: &SubscribeRequest) -> BackendResult<Subscription> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.reject {
                return Err(BackendError::rejection(402, message.clone()));
            }
            Ok(Subscription {
                id: Some("sub_123".into()),
                tier_id: request.tier_id.clone(),
                billing_cycle: request.billing_cycle,
                status: Default::default(),
                current_period_start: None,
                current_period_end: None,
            })
        }

        async fn my_subscription(&self) -> BackendResult<Subscription> {
            Err(BackendError::Unavailable("unused".into()))
        }

        async fn quota_status(&self) -> BackendResult<QuotaStatus> {
            Err(BackendError::Unavailable("unused".into()))
        }
    }

    fn setup(tier: &str, storage: i64, backend: FakeBackend) -> (TierChangeWorkflow, Arc<FakeBackend>) {
        let store = UsageStore::new();
        store.open("sub-1", tier, Utc::now());
        store.commit("sub-1", Resource::Storage, storage).unwrap();
        let guard = QuotaGuard::new(
            Arc::new(builtin_catalog().clone()),
            store,
            SeverityClassifier::default(),
        );
        let backend = Arc::new(backend);
        let workflow = TierChangeWorkflow::new("sub-1", guard, backend.clone())
            .effective_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        (workflow, backend)
    }

    #[tokio::test]
    async fn test_upgrade_happy_path() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let (workflow, backend) = setup("basic", 500, FakeBackend::default());
        let mut workflow = workflow.with_events(bus);

        let review = workflow.select_plan("pro", BillingCycle::Monthly).unwrap();
        assert!(review.is_upgrade);
        assert_eq!(review.proration.net_charge, dec!(37.33));
        assert!(!review.is_blocked());
        assert_eq!(workflow.state(), &WorkflowState::ReviewingChanges);

        workflow.proceed_to_confirm().unwrap();
        let subscription = workflow.confirm(Acknowledgements::terms()).await.unwrap();
        assert_eq!(subscription.tier_id, "pro");
        assert_eq!(workflow.state(), &WorkflowState::Completed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let snapshot = workflow.guard.store().get("sub-1").unwrap();
        assert_eq!(snapshot.tier_id, "pro");
        assert_eq!(snapshot.used(Resource::Storage), 500);

        match rx.try_recv().unwrap() {
            QuotaEvent::TierChanged(e) => {
                assert_eq!(e.to_tier, "pro");
                assert!(e.is_upgrade);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_terms_never_calls_backend() {
        let (mut workflow, backend) = setup("basic", 0, FakeBackend::default());
        workflow.select_plan("pro", BillingCycle::Monthly).unwrap();
        workflow.proceed_to_confirm().unwrap();

        let err = workflow.confirm(Acknowledgements::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(workflow.state(), &WorkflowState::Confirming);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_downgrade_requires_data_loss_ack() {
        let (mut workflow, backend) = setup("pro", 50, FakeBackend::default());
        workflow.select_plan("basic", BillingCycle::Monthly).unwrap();
        workflow.proceed_to_confirm().unwrap();

        assert!(workflow.confirm(Acknowledgements::terms()).await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        workflow.confirm(Acknowledgements::all()).await.unwrap();
        assert_eq!(workflow.state(), &WorkflowState::Completed);
    }

    #[tokio::test]
    async fn test_unknown_current_tier_fails_without_review() {
        let (mut workflow, backend) = setup("basic", 0, FakeBackend::default());
        workflow.guard.store().set_tier("sub-1", "legacy", None).unwrap();

        let err = workflow.select_plan("pro", BillingCycle::Monthly).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(matches!(
            workflow.state(),
            WorkflowState::Error { retryable: false, .. }
        ));
        assert!(workflow.review().is_none());
        assert_eq!(workflow.metrics.summary().integrity_failures, 1);

        assert!(matches!(
            workflow.proceed_to_confirm(),
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_over_limit_downgrade_blocked() {
        let (mut workflow, _) = setup("basic", 650, FakeBackend::default());
        let review = workflow.select_plan("free", BillingCycle::Monthly).unwrap();
        assert!(review.is_blocked());
        assert_eq!(review.over_limit, vec![Resource::Storage]);
        assert!(
            review
                .warnings
                .iter()
                .any(|w| w.resource == Some(Resource::Storage) && w.severity == ReviewSeverity::Error)
        );

        assert!(matches!(workflow.proceed_to_confirm(), Err(Error::Validation(_))));
        assert_eq!(workflow.state(), &WorkflowState::ReviewingChanges);
    }

    #[tokio::test]
    async fn test_over_limit_downgrade_with_grace() {
        let (workflow, _) = setup("basic", 650, FakeBackend::default());
        let mut workflow = workflow.with_policy(OverLimitPolicy::Grace { days: 7 });

        workflow.select_plan("free", BillingCycle::Monthly).unwrap();
        workflow.proceed_to_confirm().unwrap();
        workflow.confirm(Acknowledgements::all()).await.unwrap();

        let snapshot = workflow.guard.store().get("sub-1").unwrap();
        assert_eq!(snapshot.tier_id, "free");
        assert_eq!(snapshot.grace_until, NaiveDate::from_ymd_opt(2024, 6, 22));
        // still over the limit: new storage is denied
        let decision = workflow
            .guard
            .can_perform_action("sub-1", Resource::Storage, 1)
            .unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_server_rejection_is_verbatim_and_retryable() {
        let backend = FakeBackend {
            reject: Some("Card declined".into()),
            ..Default::default()
        };
        let (mut workflow, backend) = setup("basic", 0, backend);
        workflow.select_plan("pro", BillingCycle::Monthly).unwrap();
        workflow.proceed_to_confirm().unwrap();

        let err = workflow.confirm(Acknowledgements::terms()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            workflow.state(),
            &WorkflowState::Error {
                message: "Card declined".into(),
                retryable: true
            }
        );
        assert_eq!(workflow.guard.store().get("sub-1").unwrap().tier_id, "basic");

        workflow.retry().unwrap();
        assert_eq!(workflow.state(), &WorkflowState::Confirming);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_lands_in_error() {
        let backend = FakeBackend {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (workflow, _) = setup("basic", 0, backend);
        let metrics = Arc::new(QuotaMetrics::new());
        let mut workflow = workflow
            .with_apply_timeout(Duration::from_millis(20))
            .with_metrics(Arc::clone(&metrics));
        workflow.select_plan("pro", BillingCycle::Monthly).unwrap();
        workflow.proceed_to_confirm().unwrap();

        let err = workflow.confirm(Acknowledgements::terms()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(matches!(
            workflow.state(),
            WorkflowState::Error { retryable: true, .. }
        ));
        assert_eq!(metrics.workflows_applying.get(), 0);
    }

    #[tokio::test]
    async fn test_dropped_apply_lands_in_error() {
        let backend = FakeBackend {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (mut workflow, _) = setup("basic", 0, backend);
        workflow.select_plan("pro", BillingCycle::Monthly).unwrap();
        workflow.proceed_to_confirm().unwrap();

        {
            let apply = workflow.confirm(Acknowledgements::terms());
            let _ = tokio::time::timeout(Duration::from_millis(20), apply).await;
        }
        assert!(matches!(
            workflow.state(),
            WorkflowState::Error { retryable: true, .. }
        ));
    }

    #[test]
    fn test_select_plan_validation() {
        let (mut workflow, _) = setup("basic", 0, FakeBackend::default());
        assert!(matches!(
            workflow.select_plan("", BillingCycle::Monthly),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            workflow.select_plan("platinum", BillingCycle::Monthly),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            workflow.select_plan("basic", BillingCycle::Monthly),
            Err(Error::Validation(_))
        ));
        assert_eq!(workflow.state(), &WorkflowState::SelectingPlan);
    }

    #[test]
    fn test_navigation() {
        let (mut workflow, _) = setup("basic", 0, FakeBackend::default());
        assert!(matches!(
            workflow.proceed_to_confirm(),
            Err(Error::InvalidTransition { .. })
        ));

        workflow.select_plan("pro", BillingCycle::Yearly).unwrap();
        workflow.proceed_to_confirm().unwrap();
        workflow.back().unwrap();
        assert_eq!(workflow.state(), &WorkflowState::ReviewingChanges);
        workflow.back().unwrap();
        assert_eq!(workflow.state(), &WorkflowState::SelectingPlan);
        assert!(workflow.review().is_none());
        assert!(workflow.back().is_err());
    }
}
