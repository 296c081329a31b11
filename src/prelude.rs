//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use tier_quota::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;
pub use crate::{QuotaEngine, QuotaEngineBuilder};

// Catalog
pub use crate::tiers::{BillingCycle, Feature, Limit, Resource, Tier, TierCatalog};

// Usage and admission
pub use crate::quota::{GraceStatus, ProspectiveAction, QuotaDecision, ResourceDecision};
pub use crate::usage::{Severity, UsageSnapshot};

// Events
pub use crate::notify::{QuotaEvent, UsageAlert};

// Tier changes
pub use crate::backend::{HttpSubscriptionBackend, SubscriptionBackend};
pub use crate::billing::ProrationResult;
pub use crate::workflow::{Acknowledgements, ChangeReview, TierChangeWorkflow, WorkflowState};

// Configuration
pub use crate::config::EngineConfig;
