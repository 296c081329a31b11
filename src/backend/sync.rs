//! Periodic reconciliation against the backend's quota status.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SubscriptionBackend;
use crate::Result;
use crate::notify::{NotificationDispatcher, UsageAlert};
use crate::observability::{QuotaMetrics, SpanContext};
use crate::usage::{UsageSnapshot, UsageStore};

/// Background poller for one subscriber.
///
/// The subscriber lock is only taken by the store's synchronous calls, so no
/// lock is ever held while the quota-status request is in flight.
pub struct StatusSync {
    subscriber_id: String,
    backend: Arc<dyn SubscriptionBackend>,
    store: UsageStore,
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
    metrics: Arc<QuotaMetrics>,
}

impl StatusSync {
    pub fn new(
        subscriber_id: impl Into<String>,
        backend: Arc<dyn SubscriptionBackend>,
        store: UsageStore,
        dispatcher: Arc<NotificationDispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            backend,
            store,
            dispatcher,
            interval,
            metrics: Arc::new(QuotaMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<QuotaMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fetch quota status, overwrite local counters, then dispatch alerts.
    pub async fn sync_once(&self) -> Result<(UsageSnapshot, Vec<UsageAlert>)> {
        let span = SpanContext::new(&self.subscriber_id).sync_span();

        let status = match self.backend.quota_status().await {
            Ok(status) => status,
            Err(e) => {
                self.metrics.sync_failures.inc();
                tracing::warn!(
                    subscriber_id = %self.subscriber_id,
                    error = %e,
                    "Quota status sync failed"
                );
                span.finish("error");
                return Err(e.into());
            }
        };

        let snapshot = self
            .store
            .reconcile_partial(&self.subscriber_id, &status.usage_values())?;
        let alerts = self.dispatcher.observe(&snapshot)?;

        self.metrics.sync_runs.inc();
        span.finish("ok");
        Ok((snapshot, alerts))
    }

    /// Run until `cancel` fires. Failures are logged and retried on the next tick.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            subscriber_id = %self.subscriber_id,
            interval_secs = self.interval.as_secs(),
            "Status sync started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(subscriber_id = %self.subscriber_id, "Status sync stopped");
                    break;
                }
                _ = interval.tick() => {
                    // Errors are already logged and counted.
                    let _ = self.sync_once().await;
                }
            }
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::backend::{
        BackendError, BackendResult, QuotaStatus, ResourceStatus, SubscribeRequest, Subscription,
    };
    use crate::notify::EventBus;
    use crate::tiers::{Limit, Resource, builtin_catalog};
    use crate::usage::{Severity, SeverityClassifier};

    struct ScriptedBackend {
        responses: Mutex<Vec<BackendResult<QuotaStatus>>>,
    }

    #[async_trait]
    impl SubscriptionBackend for ScriptedBackend {
        async fn subscribe(&self, _request: &SubscribeRequest) -> BackendResult<Subscription> {
            Err(BackendError::Unavailable("not scripted".into()))
        }

        async fn my_subscription(&self) -> BackendResult<Subscription> {
            Err(BackendError::Unavailable("not scripted".into()))
        }

        async fn quota_status(&self) -> BackendResult<QuotaStatus> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(BackendError::Unavailable("exhausted".into())))
        }
    }

    fn status(storage: u64) -> QuotaStatus {
        let mut status = QuotaStatus::default();
        status.resources.insert(
            "storage".into(),
            ResourceStatus {
                current_usage: storage,
                limit: Limit::Capped(100),
                percentage_used: storage as f64,
                is_exceeded: storage > 100,
                reset_date: None,
            },
        );
        status
    }

    fn fixture(responses: Vec<BackendResult<QuotaStatus>>) -> (StatusSync, Arc<QuotaMetrics>) {
        let catalog = Arc::new(builtin_catalog().clone());
        let store = UsageStore::new();
        store.open("sub-1", "free", Utc::now());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            catalog,
            SeverityClassifier::default(),
            EventBus::default(),
        ));
        let metrics = Arc::new(QuotaMetrics::new());
        let sync = StatusSync::new(
            "sub-1",
            Arc::new(ScriptedBackend {
                responses: Mutex::new(responses),
            }),
            store,
            dispatcher,
            Duration::from_millis(10),
        )
        .with_metrics(Arc::clone(&metrics));
        (sync, metrics)
    }

    #[tokio::test]
    async fn test_sync_reconciles_and_alerts() {
        let (sync, metrics) = fixture(vec![Ok(status(85))]);

        let (snapshot, alerts) = sync.sync_once().await.unwrap();
        assert_eq!(snapshot.used(Resource::Storage), 85);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(metrics.sync_runs.get(), 1);
    }

    #[tokio::test]
    async fn test_sync_failure_leaves_counters() {
        let (sync, metrics) = fixture(vec![Err(BackendError::Unavailable("down".into()))]);
        sync.store.commit("sub-1", Resource::Storage, 12).unwrap();

        assert!(sync.sync_once().await.is_err());
        assert_eq!(sync.store.get("sub-1").unwrap().used(Resource::Storage), 12);
        assert_eq!(metrics.sync_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (sync, metrics) = fixture(vec![Ok(status(10)), Ok(status(20))]);
        let cancel = CancellationToken::new();
        let handle = sync.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(metrics.sync_runs.get() >= 1);
    }
}
