//! Admission decisions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::tiers::{Limit, Resource};
use crate::usage::{Admission, Severity};

/// A resource-consuming (positive) or releasing (negative) action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectiveAction {
    pub resource: Resource,
    pub amount: i64,
}

impl ProspectiveAction {
    pub fn new(resource: Resource, amount: i64) -> Self {
        Self { resource, amount }
    }

    pub fn consume(resource: Resource, amount: u64) -> Self {
        Self::new(resource, i64::try_from(amount).unwrap_or(i64::MAX))
    }

    pub fn release(resource: Resource, amount: u64) -> Self {
        Self::new(resource, -i64::try_from(amount).unwrap_or(i64::MAX))
    }

    pub fn is_release(&self) -> bool {
        self.amount < 0
    }
}

/// Decision for a single resource.
///
/// `allowed` is the hard gate; `projected_severity` is advisory so a caller can
/// tell "blocked" apart from "permitted but risky" from one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDecision {
    pub resource: Resource,
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub limit: Limit,
    pub current_used: u64,
    pub requested: i64,
    pub projected_used: u64,
    pub projected_percentage: f64,
    pub projected_severity: Severity,
}

impl ResourceDecision {
    pub fn is_risky(&self) -> bool {
        self.allowed && self.projected_severity >= Severity::Warning
    }

    /// Remaining headroom before the action, `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        self.limit
            .capped()
            .map(|max| max.saturating_sub(self.current_used))
    }
}

/// Aggregate decision over every resource an action touches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Failing reason codes joined with `,`.
    pub reason: Option<String>,
    /// Failing messages joined with `; `.
    pub message: Option<String>,
    /// Highest projected percentage across resources.
    pub projected_percentage: f64,
    /// Highest projected severity across resources.
    pub projected_severity: Severity,
    pub resources: Vec<ResourceDecision>,
}

impl QuotaDecision {
    pub fn from_resources(resources: Vec<ResourceDecision>) -> Self {
        let denied: Vec<&ResourceDecision> = resources.iter().filter(|d| !d.allowed).collect();

        let join = |pick: fn(&ResourceDecision) -> Option<&String>, sep: &str| {
            let parts: Vec<&str> = denied
                .iter()
                .filter_map(|d| pick(d).map(String::as_str))
                .collect();
            (!parts.is_empty()).then(|| parts.join(sep))
        };
        let reason = join(|d| d.reason.as_ref(), ",");
        let message = join(|d| d.message.as_ref(), "; ");

        let projected_percentage = resources
            .iter()
            .map(|d| d.projected_percentage)
            .fold(0.0, f64::max);
        let projected_severity = resources
            .iter()
            .map(|d| d.projected_severity)
            .max()
            .unwrap_or_default();

        Self {
            allowed: denied.is_empty(),
            reason,
            message,
            projected_percentage,
            projected_severity,
            resources,
        }
    }

    pub fn denied(&self) -> impl Iterator<Item = &ResourceDecision> {
        self.resources.iter().filter(|d| !d.allowed)
    }

    pub fn resource(&self, resource: Resource) -> Option<&ResourceDecision> {
        self.resources.iter().find(|d| d.resource == resource)
    }
}

/// Where an account stands relative to its downgrade grace window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GraceStatus {
    /// No grace window is open.
    Inactive,
    /// Usage fits the tier again; the window was closed early.
    Resolved,
    /// Inside the window with these resources still above their limits.
    Active {
        until: NaiveDate,
        over_limit: Vec<Resource>,
    },
    /// The window ran out with these resources still above their limits.
    Expired {
        until: NaiveDate,
        over_limit: Vec<Resource>,
    },
}

impl GraceStatus {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    pub fn over_limit(&self) -> &[Resource] {
        match self {
            Self::Active { over_limit, .. } | Self::Expired { over_limit, .. } => over_limit,
            Self::Inactive | Self::Resolved => &[],
        }
    }
}

impl Admission for QuotaDecision {
    fn admitted(&self) -> bool {
        self.allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(resource: Resource, allowed: bool, pct: f64, severity: Severity) -> ResourceDecision {
        ResourceDecision {
            resource,
            allowed,
            reason: (!allowed).then(|| resource.limit_exceeded_reason()),
            message: (!allowed).then(|| format!("{resource} full")),
            limit: Limit::Capped(100),
            current_used: 0,
            requested: 0,
            projected_used: 0,
            projected_percentage: pct,
            projected_severity: severity,
        }
    }

    #[test]
    fn test_aggregate_all_allowed() {
        let d = QuotaDecision::from_resources(vec![
            decision(Resource::Storage, true, 65.0, Severity::Caution),
            decision(Resource::Documents, true, 82.0, Severity::Warning),
        ]);
        assert!(d.allowed);
        assert!(d.reason.is_none());
        assert_eq!(d.projected_percentage, 82.0);
        assert_eq!(d.projected_severity, Severity::Warning);
    }

    #[test]
    fn test_aggregate_joins_failures() {
        let d = QuotaDecision::from_resources(vec![
            decision(Resource::Storage, false, 105.0, Severity::Critical),
            decision(Resource::Tokens, true, 10.0, Severity::Normal),
            decision(Resource::Documents, false, 110.0, Severity::Critical),
        ]);
        assert!(!d.allowed);
        assert_eq!(
            d.reason.as_deref(),
            Some("storage_limit_exceeded,documents_limit_exceeded")
        );
        assert_eq!(d.message.as_deref(), Some("storage full; documents full"));
        assert_eq!(d.denied().count(), 2);
    }

    #[test]
    fn test_release_constructor() {
        let action = ProspectiveAction::release(Resource::Storage, 30);
        assert_eq!(action.amount, -30);
        assert!(action.is_release());
    }
}
