//! Subscription tier definitions.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::resource::{Limit, Resource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// Product capability gated by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    DocumentUpload,
    AiChat,
    AdvancedModels,
    PrioritySupport,
    ApiAccess,
    TeamWorkspaces,
    CustomBranding,
}

impl Feature {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::DocumentUpload => "Document upload",
            Self::AiChat => "AI chat",
            Self::AdvancedModels => "Advanced AI models",
            Self::PrioritySupport => "Priority support",
            Self::ApiAccess => "API access",
            Self::TeamWorkspaces => "Team workspaces",
            Self::CustomBranding => "Custom branding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub storage_mb: Limit,
    pub tokens: Limit,
    pub documents: Limit,
}

impl TierLimits {
    pub const fn new(storage_mb: Limit, tokens: Limit, documents: Limit) -> Self {
        Self {
            storage_mb,
            tokens,
            documents,
        }
    }

    pub const fn unlimited() -> Self {
        Self::new(Limit::Unlimited, Limit::Unlimited, Limit::Unlimited)
    }

    pub fn get(&self, resource: Resource) -> Limit {
        match resource {
            Resource::Storage => self.storage_mb,
            Resource::Tokens => self.tokens,
            Resource::Documents => self.documents,
        }
    }
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub id: String,
    pub name: String,
    pub limits: TierLimits,
    pub monthly_price: Decimal,
    pub yearly_price: Decimal,
    #[serde(default)]
    pub features: BTreeSet<Feature>,
}

impl Tier {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        limits: TierLimits,
        monthly_price: Decimal,
        yearly_price: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            limits,
            monthly_price,
            yearly_price,
            features: BTreeSet::new(),
        }
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn limit(&self, resource: Resource) -> Limit {
        self.limits.get(resource)
    }

    pub fn price(&self, cycle: BillingCycle) -> Decimal {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Yearly => self.yearly_price,
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Features available on `self` that `other` does not include.
    pub fn lost_features(&self, other: &Tier) -> Vec<Feature> {
        self.features.difference(&other.features).copied().collect()
    }
}
