//! Engine facade wiring the catalog, store, guard and dispatcher together.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use secrecy::SecretString;
use tokio::sync::broadcast;

use crate::backend::{HttpSubscriptionBackend, StatusSync, SubscriptionBackend};
use crate::cache::{CacheRecord, FileCache};
use crate::config::{ConfigProvider, EngineConfig};
use crate::notify::{EventBus, NotificationDispatcher, QuotaEvent, UsageAlert};
use crate::observability::QuotaMetrics;
use crate::quota::{
    Admitted, GraceStatus, ProspectiveAction, QuotaDecision, QuotaGuard, ResourceDecision,
};
use crate::tiers::{Resource, TierCatalog, builtin_catalog};
use crate::usage::{SeverityClassifier, UsageSnapshot, UsageStore};
use crate::workflow::TierChangeWorkflow;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct QuotaEngineBuilder {
    config: Option<EngineConfig>,
    catalog: Option<Arc<TierCatalog>>,
    cache_dir: Option<PathBuf>,
}

impl QuotaEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn catalog(mut self, catalog: impl Into<Arc<TierCatalog>>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Resolve the config from a provider, then build.
    pub async fn build_from<P: ConfigProvider + ?Sized>(mut self, provider: &P) -> Result<QuotaEngine> {
        self.config = Some(EngineConfig::load(provider).await?);
        self.build()
    }

    pub fn build(self) -> Result<QuotaEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(builtin_catalog().clone()));
        let classifier = SeverityClassifier::new(config.thresholds);
        let bus = EventBus::new(config.event_capacity);
        let metrics = Arc::new(QuotaMetrics::new());
        let store = UsageStore::new();

        let guard = QuotaGuard::new(Arc::clone(&catalog), store.clone(), classifier)
            .with_events(bus.clone())
            .with_metrics(Arc::clone(&metrics));
        let dispatcher = Arc::new(
            NotificationDispatcher::new(Arc::clone(&catalog), classifier, bus.clone())
                .with_metrics(Arc::clone(&metrics)),
        );

        tracing::debug!(
            tiers = catalog.len(),
            policy = ?config.over_limit_policy,
            cache = self.cache_dir.is_some(),
            "Quota engine built"
        );

        Ok(QuotaEngine {
            config,
            catalog,
            store,
            guard,
            dispatcher,
            bus,
            metrics,
            cache: self.cache_dir.map(FileCache::new),
        })
    }
}

/// Entry point for quota operations.
///
/// Cloning is cheap; clones share the same store, event bus and metrics.
#[derive(Debug, Clone)]
pub struct QuotaEngine {
    config: EngineConfig,
    catalog: Arc<TierCatalog>,
    store: UsageStore,
    guard: QuotaGuard,
    dispatcher: Arc<NotificationDispatcher>,
    bus: EventBus,
    metrics: Arc<QuotaMetrics>,
    cache: Option<FileCache>,
}

impl QuotaEngine {
    pub fn builder() -> QuotaEngineBuilder {
        QuotaEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &UsageStore {
        &self.store
    }

    pub fn guard(&self) -> &QuotaGuard {
        &self.guard
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuotaEvent> {
        self.bus.subscribe()
    }

    pub fn metrics(&self) -> &QuotaMetrics {
        &self.metrics
    }

    /// Open a usage account on `tier_id` with zeroed counters.
    pub fn activate(
        &self,
        subscriber_id: &str,
        tier_id: &str,
        period_start: DateTime<Utc>,
    ) -> Result<UsageSnapshot> {
        if subscriber_id.is_empty() {
            return Err(Error::Validation("Subscriber id must not be empty".into()));
        }
        self.catalog.get(tier_id)?;

        let snapshot = self.store.open(subscriber_id, tier_id, period_start);
        self.dispatcher.begin_period(subscriber_id, period_start);
        tracing::info!(subscriber_id, tier_id, %period_start, "Subscriber activated");
        Ok(snapshot)
    }

    /// Start a new billing period. Alert state is cleared so thresholds fire again.
    pub fn rollover(&self, subscriber_id: &str, period_start: DateTime<Utc>) -> Result<UsageSnapshot> {
        let snapshot = self.store.rollover(subscriber_id, period_start)?;
        self.dispatcher.begin_period(subscriber_id, snapshot.period_start);
        Ok(snapshot)
    }

    pub fn usage(&self, subscriber_id: &str) -> Result<UsageSnapshot> {
        self.store.get(subscriber_id)
    }

    pub fn can_perform_action(
        &self,
        subscriber_id: &str,
        resource: Resource,
        amount: i64,
    ) -> Result<ResourceDecision> {
        self.guard.can_perform_action(subscriber_id, resource, amount)
    }

    pub fn can_perform_actions(
        &self,
        subscriber_id: &str,
        actions: &[ProspectiveAction],
    ) -> Result<QuotaDecision> {
        self.guard.can_perform_actions(subscriber_id, actions)
    }

    /// Check and record the actions atomically, then raise any threshold alerts.
    ///
    /// A denied batch commits nothing and returns `Ok` with `outcome.allowed == false`.
    pub fn consume(&self, subscriber_id: &str, actions: &[ProspectiveAction]) -> Result<Admitted> {
        let admitted = self.guard.admit(subscriber_id, actions)?;
        if let Some(snapshot) = &admitted.snapshot {
            self.dispatcher.observe(snapshot)?;
        }
        Ok(admitted)
    }

    /// Like [`consume`](Self::consume), but a denial is an [`Error::QuotaExceeded`].
    pub fn require(&self, subscriber_id: &str, actions: &[ProspectiveAction]) -> Result<UsageSnapshot> {
        let admitted = self.consume(subscriber_id, actions)?;
        match admitted.snapshot {
            Some(snapshot) => Ok(snapshot),
            None => {
                let decision = admitted.outcome;
                match decision.denied().next() {
                    Some(denied) => Err(Error::QuotaExceeded {
                        resource: denied.resource,
                        limit: denied.limit.capped().unwrap_or(u64::MAX),
                        current: denied.current_used,
                        requested: denied.requested,
                        message: decision.message.clone().unwrap_or_default(),
                    }),
                    None => Err(Error::InvariantViolation(
                        "Denied admission without a denied resource".into(),
                    )),
                }
            }
        }
    }

    /// Give back previously consumed capacity. Never denied.
    pub fn release(&self, subscriber_id: &str, resource: Resource, amount: u64) -> Result<UsageSnapshot> {
        self.require(subscriber_id, &[ProspectiveAction::release(resource, amount)])
    }

    /// Re-evaluate alert severities against the current snapshot, e.g. after a tier change.
    pub fn refresh_alerts(&self, subscriber_id: &str) -> Result<Vec<UsageAlert>> {
        let snapshot = self.store.get(subscriber_id)?;
        self.dispatcher.observe(&snapshot)
    }

    /// Close the subscriber's downgrade grace window if it is resolved or past due.
    ///
    /// See [`QuotaGuard::enforce_grace`].
    pub fn enforce_grace(&self, subscriber_id: &str, today: NaiveDate) -> Result<GraceStatus> {
        self.guard.enforce_grace(subscriber_id, today)
    }

    /// Start a tier change for the subscriber, configured from [`EngineConfig`].
    pub fn tier_change(
        &self,
        subscriber_id: &str,
        backend: Arc<dyn SubscriptionBackend>,
    ) -> TierChangeWorkflow {
        TierChangeWorkflow::new(subscriber_id, self.guard.clone(), backend)
            .with_policy(self.config.over_limit_policy)
            .with_apply_timeout(self.config.apply_timeout)
            .with_events(self.bus.clone())
            .with_metrics(Arc::clone(&self.metrics))
    }

    /// Background reconciliation against the backend's quota status.
    pub fn status_sync(&self, subscriber_id: &str, backend: Arc<dyn SubscriptionBackend>) -> StatusSync {
        StatusSync::new(
            subscriber_id,
            backend,
            self.store.clone(),
            Arc::clone(&self.dispatcher),
            self.config.sync_interval,
        )
        .with_metrics(Arc::clone(&self.metrics))
    }

    /// HTTP backend at the configured `backend_url`.
    pub fn http_backend(&self, token: Option<SecretString>) -> Result<HttpSubscriptionBackend> {
        let Some(url) = self.config.backend_url.clone() else {
            return Err(Error::Config("backend_url is not configured".into()));
        };
        let backend = HttpSubscriptionBackend::new(url)?;
        Ok(match token {
            Some(token) => backend.with_token(token),
            None => backend,
        })
    }

    /// Write the subscriber's usage and alert state to the local cache.
    ///
    /// Returns `false` when no cache directory is configured.
    pub async fn persist(&self, subscriber_id: &str) -> Result<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let snapshot = self.store.get(subscriber_id)?;
        let state = self.dispatcher.state(subscriber_id);
        let record = CacheRecord::capture(&snapshot, state.as_ref());
        cache.save(&record).await?;
        tracing::debug!(subscriber_id, "Usage cached");
        Ok(true)
    }

    /// Seed an empty account from the local cache.
    ///
    /// Unreadable or stale records are skipped with a warning: the cache only
    /// speeds up startup, the backend remains authoritative.
    pub async fn warm_start(&self, subscriber_id: &str) -> Result<Option<UsageSnapshot>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        if self.store.contains(subscriber_id) {
            return Ok(None);
        }

        let record = match cache.load(subscriber_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(subscriber_id, error = %e, "Ignoring unreadable usage cache");
                return Ok(None);
            }
        };

        if record.subscriber_id != subscriber_id {
            tracing::warn!(
                subscriber_id,
                cached = %record.subscriber_id,
                "Ignoring usage cache for another subscriber"
            );
            return Ok(None);
        }
        if !self.catalog.contains(&record.tier_id) {
            tracing::warn!(
                subscriber_id,
                tier_id = %record.tier_id,
                "Ignoring usage cache with unknown tier"
            );
            return Ok(None);
        }

        record.restore_into(&self.store, &self.dispatcher);
        Ok(Some(self.store.get(subscriber_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;
    use crate::usage::Severity;

    fn engine() -> QuotaEngine {
        QuotaEngine::builder().build().unwrap()
    }

    #[test]
    fn test_activate_unknown_tier() {
        let engine = engine();
        let err = engine.activate("sub-1", "platinum", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!engine.store().contains("sub-1"));
    }

    #[test]
    fn test_require_maps_denial() {
        let engine = engine();
        engine.activate("sub-1", "free", Utc::now()).unwrap();
        let limit = engine
            .catalog()
            .get("free")
            .unwrap()
            .limit(Resource::Documents)
            .capped()
            .unwrap();

        let err = engine
            .require(
                "sub-1",
                &[ProspectiveAction::consume(Resource::Documents, limit + 1)],
            )
            .unwrap_err();
        match err {
            Error::QuotaExceeded {
                resource,
                limit: l,
                current,
                ..
            } => {
                assert_eq!(resource, Resource::Documents);
                assert_eq!(l, limit);
                assert_eq!(current, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.usage("sub-1").unwrap().used(Resource::Documents), 0);
    }

    #[test]
    fn test_consume_raises_alert() {
        let engine = engine();
        let mut rx = engine.subscribe();
        engine.activate("sub-1", "basic", Utc::now()).unwrap();
        let limit = engine
            .catalog()
            .get("basic")
            .unwrap()
            .limit(Resource::Tokens)
            .capped()
            .unwrap();

        let admitted = engine
            .consume(
                "sub-1",
                &[ProspectiveAction::consume(Resource::Tokens, limit * 85 / 100)],
            )
            .unwrap();
        assert!(admitted.outcome.allowed);

        match rx.try_recv().unwrap() {
            QuotaEvent::UsageAlert(alert) => {
                assert_eq!(alert.resource, Resource::Tokens);
                assert_eq!(alert.severity, Severity::Warning);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = QuotaEngine::builder()
            .config(EngineConfig::default().sync_interval(std::time::Duration::ZERO))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_build_from_provider() {
        let provider = MemoryConfigProvider::new()
            .value("apply_timeout_secs", "5")
            .value("over_limit_policy", "grace");
        let engine = QuotaEngine::builder().build_from(&provider).await.unwrap();
        assert_eq!(engine.config().apply_timeout.as_secs(), 5);
        assert!(matches!(
            engine.config().over_limit_policy,
            crate::workflow::OverLimitPolicy::Grace { .. }
        ));
    }

    #[test]
    fn test_http_backend_requires_url() {
        let engine = engine();
        assert!(matches!(engine.http_backend(None), Err(Error::Config(_))));
    }
}
