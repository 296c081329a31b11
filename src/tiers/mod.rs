//! Tier catalog: plans, resource limits and prices.

mod catalog;
mod resource;
mod tier;

pub use catalog::{TierCatalog, TierCatalogBuilder, builtin_catalog};
pub use resource::{Limit, Resource, UNLIMITED_SENTINEL};
pub use tier::{BillingCycle, Feature, Tier, TierLimits};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Tier not found: {id}")]
    NotFound { id: String },

    #[error("Duplicate tier id: {id}")]
    Duplicate { id: String },

    #[error("Invalid tier definition: {message}")]
    Invalid { message: String },
}
