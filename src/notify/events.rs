//! Typed quota events and the broadcast bus that carries them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::tiers::Resource;
use crate::usage::Severity;

/// Default buffered events per receiver before lagging receivers drop the oldest.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A usage threshold was crossed upward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAlert {
    pub id: Uuid,
    pub subscriber_id: String,
    pub resource: Resource,
    pub severity: Severity,
    pub percentage: f64,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}

/// An action was denied by admission control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaExceeded {
    pub subscriber_id: String,
    pub resource: Resource,
    pub reason: String,
    pub message: String,
    pub limit: u64,
    pub current: u64,
    pub requested: i64,
}

/// A tier change was committed by the subscription backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierChanged {
    pub subscriber_id: String,
    pub from_tier: String,
    pub to_tier: String,
    pub is_upgrade: bool,
    pub net_charge: Decimal,
    pub effective_date: NaiveDate,
}

/// A downgrade grace window ended with usage still above the tier's limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraceExpired {
    pub subscriber_id: String,
    pub tier_id: String,
    pub grace_until: NaiveDate,
    pub over_limit: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuotaEvent {
    UsageAlert(UsageAlert),
    QuotaExceeded(QuotaExceeded),
    TierChanged(TierChanged),
    GraceExpired(GraceExpired),
}

impl QuotaEvent {
    pub fn subscriber_id(&self) -> &str {
        match self {
            Self::UsageAlert(e) => &e.subscriber_id,
            Self::QuotaExceeded(e) => &e.subscriber_id,
            Self::TierChanged(e) => &e.subscriber_id,
            Self::GraceExpired(e) => &e.subscriber_id,
        }
    }
}

/// Fan-out channel for [`QuotaEvent`]s.
///
/// Rendering (toasts, banners, emails) subscribes here; emitting with no
/// subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QuotaEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuotaEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Returns the number of receivers the event was delivered to.
    pub fn emit(&self, event: QuotaEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
