//! Static tier table.
//!
//! Tiers are ranked by insertion order: a later tier is a higher plan.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use rust_decimal_macros::dec;

use super::CatalogError;
use super::resource::Limit;
use super::tier::{Feature, Tier, TierLimits};

#[derive(Debug, Clone)]
pub struct TierCatalog {
    tiers: Vec<Arc<Tier>>,
    index: HashMap<String, usize>,
}

impl TierCatalog {
    pub fn builder() -> TierCatalogBuilder {
        TierCatalogBuilder::new()
    }

    pub fn get(&self, id: &str) -> Result<&Tier, CatalogError> {
        self.index
            .get(id)
            .map(|&i| self.tiers[i].as_ref())
            .ok_or_else(|| CatalogError::NotFound { id: id.to_string() })
    }

    pub fn get_arc(&self, id: &str) -> Result<Arc<Tier>, CatalogError> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.tiers[i]))
            .ok_or_else(|| CatalogError::NotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn rank(&self, id: &str) -> Result<usize, CatalogError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CatalogError::NotFound { id: id.to_string() })
    }

    /// `true` when moving from `current` to `candidate` raises the plan rank.
    pub fn is_upgrade(&self, current: &str, candidate: &str) -> Result<bool, CatalogError> {
        Ok(self.rank(candidate)? > self.rank(current)?)
    }

    pub fn tiers(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        builtin_catalog().clone()
    }
}

#[derive(Debug, Default)]
pub struct TierCatalogBuilder {
    tiers: Vec<Tier>,
}

impl TierCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self) -> Self {
        self.tiers.extend(default_tiers());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn build(self) -> Result<TierCatalog, CatalogError> {
        let mut index = HashMap::with_capacity(self.tiers.len());
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.id.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    message: format!("tier at position {i} has an empty id"),
                });
            }
            if tier.monthly_price.is_sign_negative() || tier.yearly_price.is_sign_negative() {
                return Err(CatalogError::Invalid {
                    message: format!("tier '{}' has a negative price", tier.id),
                });
            }
            if index.insert(tier.id.clone(), i).is_some() {
                return Err(CatalogError::Duplicate {
                    id: tier.id.clone(),
                });
            }
        }

        Ok(TierCatalog {
            tiers: self.tiers.into_iter().map(Arc::new).collect(),
            index,
        })
    }
}

fn default_tiers() -> Vec<Tier> {
    vec![
        Tier::new(
            "free",
            "Free",
            TierLimits::new(Limit::Capped(100), Limit::Capped(10_000), Limit::Capped(10)),
            dec!(0),
            dec!(0),
        )
        .with_features([Feature::DocumentUpload, Feature::AiChat]),
        Tier::new(
            "basic",
            "Basic",
            TierLimits::new(
                Limit::Capped(1_000),
                Limit::Capped(100_000),
                Limit::Capped(100),
            ),
            dec!(29),
            dec!(290),
        )
        .with_features([
            Feature::DocumentUpload,
            Feature::AiChat,
            Feature::AdvancedModels,
        ]),
        Tier::new(
            "pro",
            "Pro",
            TierLimits::new(
                Limit::Capped(10_000),
                Limit::Capped(1_000_000),
                Limit::Unlimited,
            ),
            dec!(99),
            dec!(990),
        )
        .with_features([
            Feature::DocumentUpload,
            Feature::AiChat,
            Feature::AdvancedModels,
            Feature::PrioritySupport,
            Feature::ApiAccess,
        ]),
        Tier::new(
            "enterprise",
            "Enterprise",
            TierLimits::unlimited(),
            dec!(299),
            dec!(2990),
        )
        .with_features([
            Feature::DocumentUpload,
            Feature::AiChat,
            Feature::AdvancedModels,
            Feature::PrioritySupport,
            Feature::ApiAccess,
            Feature::TeamWorkspaces,
            Feature::CustomBranding,
        ]),
    ]
}

static BUILTIN_CATALOG: LazyLock<TierCatalog> = LazyLock::new(|| TierCatalog {
    index: default_tiers()
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.clone(), i))
        .collect(),
    tiers: default_tiers().into_iter().map(Arc::new).collect(),
});

/// The built-in `free` / `basic` / `pro` / `enterprise` catalog.
pub fn builtin_catalog() -> &'static TierCatalog {
    &BUILTIN_CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::Resource;

    #[test]
    fn test_builtin_lookup() {
        let catalog = builtin_catalog();
        let basic = catalog.get("basic").unwrap();
        assert_eq!(basic.monthly_price, dec!(29));
        assert_eq!(basic.limit(Resource::Storage), Limit::Capped(1_000));

        let pro = catalog.get("pro").unwrap();
        assert!(pro.limit(Resource::Documents).is_unlimited());
    }

    #[test]
    fn test_unknown_tier() {
        let err = builtin_catalog().get("platinum").unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { ref id } if id == "platinum"));
    }

    #[test]
    fn test_rank_ordering() {
        let catalog = TierCatalog::default();
        assert!(catalog.is_upgrade("free", "pro").unwrap());
        assert!(!catalog.is_upgrade("pro", "basic").unwrap());
        assert!(!catalog.is_upgrade("pro", "pro").unwrap());
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let result = TierCatalog::builder()
            .with_defaults()
            .tier(Tier::new(
                "free",
                "Free again",
                TierLimits::unlimited(),
                dec!(0),
                dec!(0),
            ))
            .build();
        assert!(matches!(result, Err(CatalogError::Duplicate { .. })));
    }

    #[test]
    fn test_builder_rejects_negative_price() {
        let result = TierCatalog::builder()
            .tier(Tier::new(
                "odd",
                "Odd",
                TierLimits::unlimited(),
                dec!(-1),
                dec!(0),
            ))
            .build();
        assert!(matches!(result, Err(CatalogError::Invalid { .. })));
    }

    #[test]
    fn test_custom_catalog() {
        let catalog = TierCatalog::builder()
            .tier(Tier::new(
                "solo",
                "Solo",
                TierLimits::new(Limit::Capped(5), Limit::Capped(5), Limit::Capped(5)),
                dec!(5),
                dec!(50),
            ))
            .build()
            .unwrap();
        assert_eq!(catalog.rank("solo").unwrap(), 0);
        assert!(!catalog.contains("free"));
    }
}
