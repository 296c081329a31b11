//! Subscription backend wire types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tiers::{BillingCycle, Limit, Resource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub tier_id: String,
    pub billing_cycle: BillingCycle,
    pub prorate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Trialing,
    PastDue,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub id: Option<String>,
    pub tier_id: String,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub current_usage: u64,
    pub limit: Limit,
    #[serde(default)]
    pub percentage_used: f64,
    #[serde(default)]
    pub is_exceeded: bool,
    #[serde(default)]
    pub reset_date: Option<DateTime<Utc>>,
}

/// Authoritative per-resource usage, keyed by resource name.
///
/// Unknown resource names are kept but ignored by reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaStatus {
    pub resources: BTreeMap<String, ResourceStatus>,
}

impl QuotaStatus {
    pub fn get(&self, resource: Resource) -> Option<&ResourceStatus> {
        self.resources.get(resource.as_str())
    }

    /// Server usage values for the resources this crate tracks.
    pub fn usage_values(&self) -> Vec<(Resource, u64)> {
        Resource::ALL
            .iter()
            .filter_map(|&r| self.get(r).map(|s| (r, s.current_usage)))
            .collect()
    }

    /// Resources the server reports as exceeded.
    pub fn exceeded(&self) -> Vec<Resource> {
        Resource::ALL
            .iter()
            .copied()
            .filter(|&r| self.get(r).is_some_and(|s| s.is_exceeded))
            .collect()
    }
}
