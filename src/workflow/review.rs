//! Impact review for a prospective tier change.

use serde::Serialize;

use super::OverLimitPolicy;
use crate::billing::ProrationResult;
use crate::quota::ResourceDecision;
use crate::tiers::{BillingCycle, Feature, Limit, Resource, Tier};
use crate::usage::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewSeverity {
    Info,
    Warning,
    /// Blocks progression to `Confirming`.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewWarning {
    pub severity: ReviewSeverity,
    /// `None` for feature-level notes.
    pub resource: Option<Resource>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeReview {
    pub current_tier: Tier,
    pub new_tier: Tier,
    pub billing_cycle: BillingCycle,
    pub is_upgrade: bool,
    pub warnings: Vec<ReviewWarning>,
    pub lost_features: Vec<Feature>,
    /// Resources whose current usage already exceeds the new tier's limit.
    pub over_limit: Vec<Resource>,
    pub proration: ProrationResult,
}

impl ChangeReview {
    pub fn is_blocked(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| w.severity == ReviewSeverity::Error)
    }

    pub fn is_over_limit(&self) -> bool {
        !self.over_limit.is_empty()
    }

    /// Downgrades and over-limit changes need an explicit data-loss acknowledgement.
    pub fn requires_data_loss_ack(&self) -> bool {
        !self.is_upgrade || self.is_over_limit()
    }

    pub fn highest_severity(&self) -> Option<ReviewSeverity> {
        self.warnings.iter().map(|w| w.severity).max()
    }
}

fn limit_text(resource: Resource, limit: Limit) -> String {
    match limit {
        Limit::Unlimited => "unlimited".to_string(),
        Limit::Capped(max) => resource.format_amount(max),
    }
}

/// Build per-resource and per-feature warnings from guard decisions evaluated
/// against the new tier.
pub(super) fn resource_warnings(
    current: &Tier,
    new: &Tier,
    decisions: &[ResourceDecision],
    policy: OverLimitPolicy,
) -> Vec<ReviewWarning> {
    let mut warnings = Vec::new();

    for decision in decisions {
        let resource = decision.resource;
        let old_limit = current.limit(resource);
        let new_limit = new.limit(resource);
        let used = resource.format_amount(decision.current_used);
        let new_text = limit_text(resource, new_limit);

        if !decision.allowed {
            let message = match policy {
                OverLimitPolicy::HardBlock => format!(
                    "Your current {} usage ({}) exceeds the {} plan limit of {}. Reduce usage before switching.",
                    resource, used, new.name, new_text
                ),
                OverLimitPolicy::Grace { days } => format!(
                    "Your current {} usage ({}) exceeds the {} plan limit of {}. You will have {} days to reduce it; new {} usage is blocked until then.",
                    resource, used, new.name, new_text, days, resource
                ),
            };
            let severity = match policy {
                OverLimitPolicy::HardBlock => ReviewSeverity::Error,
                OverLimitPolicy::Grace { .. } => ReviewSeverity::Warning,
            };
            warnings.push(ReviewWarning {
                severity,
                resource: Some(resource),
                message,
            });
        } else if decision.projected_severity >= Severity::Warning {
            warnings.push(ReviewWarning {
                severity: ReviewSeverity::Warning,
                resource: Some(resource),
                message: format!(
                    "You would be using {:.0}% of the {} plan's {} limit ({} of {}).",
                    decision.projected_percentage, new.name, resource, used, new_text
                ),
            });
        } else if old_limit != new_limit {
            warnings.push(ReviewWarning {
                severity: ReviewSeverity::Info,
                resource: Some(resource),
                message: format!(
                    "{} limit changes from {} to {}.",
                    resource,
                    limit_text(resource, old_limit),
                    new_text
                ),
            });
        }
    }

    for feature in current.lost_features(new) {
        warnings.push(ReviewWarning {
            severity: ReviewSeverity::Warning,
            resource: None,
            message: format!(
                "You will lose access to {} on the {} plan.",
                feature.display_name(),
                new.name
            ),
        });
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::evaluate;
    use crate::tiers::builtin_catalog;
    use crate::usage::{SeverityClassifier, UsageCounters};

    fn decisions(new: &Tier, counters: UsageCounters) -> Vec<ResourceDecision> {
        let classifier = SeverityClassifier::default();
        Resource::ALL
            .iter()
            .map(|&r| evaluate(new, &counters, r, 0, &classifier))
            .collect()
    }

    #[test]
    fn test_over_limit_is_error_under_hard_block() {
        let catalog = builtin_catalog();
        let basic = catalog.get("basic").unwrap();
        let free = catalog.get("free").unwrap();

        let warnings = resource_warnings(
            basic,
            free,
            &decisions(free, UsageCounters::new(650, 0, 0)),
            OverLimitPolicy::HardBlock,
        );
        let storage = warnings
            .iter()
            .find(|w| w.resource == Some(Resource::Storage))
            .unwrap();
        assert_eq!(storage.severity, ReviewSeverity::Error);
        assert!(storage.message.contains("650 MB"));
        assert!(storage.message.contains("100 MB"));
        // basic-only feature is lost
        assert!(
            warnings
                .iter()
                .any(|w| w.resource.is_none() && w.message.contains("Advanced AI models"))
        );
    }

    #[test]
    fn test_over_limit_is_warning_under_grace() {
        let catalog = builtin_catalog();
        let basic = catalog.get("basic").unwrap();
        let free = catalog.get("free").unwrap();

        let warnings = resource_warnings(
            basic,
            free,
            &decisions(free, UsageCounters::new(650, 0, 0)),
            OverLimitPolicy::Grace { days: 14 },
        );
        assert!(warnings.iter().all(|w| w.severity != ReviewSeverity::Error));
        assert!(warnings.iter().any(|w| w.message.contains("14 days")));
    }

    #[test]
    fn test_upgrade_reports_info_only() {
        let catalog = builtin_catalog();
        let basic = catalog.get("basic").unwrap();
        let pro = catalog.get("pro").unwrap();

        let warnings = resource_warnings(
            basic,
            pro,
            &decisions(pro, UsageCounters::new(10, 100, 1)),
            OverLimitPolicy::HardBlock,
        );
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| w.severity == ReviewSeverity::Info));
        assert!(warnings.iter().any(|w| w.message == "documents limit changes from 100 documents to unlimited."));
    }

    #[test]
    fn test_near_limit_is_warning() {
        let catalog = builtin_catalog();
        let pro = catalog.get("pro").unwrap();
        let basic = catalog.get("basic").unwrap();

        let warnings = resource_warnings(
            pro,
            basic,
            &decisions(basic, UsageCounters::new(900, 0, 0)),
            OverLimitPolicy::HardBlock,
        );
        let storage = warnings
            .iter()
            .find(|w| w.resource == Some(Resource::Storage))
            .unwrap();
        assert_eq!(storage.severity, ReviewSeverity::Warning);
        assert!(storage.message.starts_with("You would be using 90%"));
    }
}
