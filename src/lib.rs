//! # tier-quota
//!
//! Quota tracking and tier enforcement for subscription-based services.
//!
//! The engine keeps per-subscriber usage counters for metered resources
//! (storage, tokens, documents), decides whether a prospective action fits
//! the subscriber's tier, emits threshold alerts as usage grows, and drives
//! tier changes through a review and confirmation workflow with prorated
//! charges.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use tier_quota::{ProspectiveAction, QuotaEngine, Resource};
//!
//! # fn main() -> Result<(), tier_quota::Error> {
//! let engine = QuotaEngine::builder().build()?;
//! engine.activate("sub-1", "basic", Utc::now())?;
//!
//! let admitted = engine.consume("sub-1", &[ProspectiveAction::consume(Resource::Tokens, 1200)])?;
//! if let Some(reason) = &admitted.outcome.message {
//!     println!("Denied: {}", reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Tier Changes
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tier_quota::{Acknowledgements, BillingCycle, HttpSubscriptionBackend, QuotaEngine};
//!
//! # async fn example(engine: QuotaEngine) -> Result<(), tier_quota::Error> {
//! let backend = HttpSubscriptionBackend::new("https://billing.example.com/api/".parse().unwrap())?
//!     .with_token("secret");
//! let mut workflow = engine.tier_change("sub-1", Arc::new(backend));
//!
//! let review = workflow.select_plan("pro", BillingCycle::Monthly)?;
//! println!("Due today: ${}", review.proration.net_charge);
//! workflow.proceed_to_confirm()?;
//! workflow.confirm(Acknowledgements::terms()).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backend;
pub mod billing;
pub mod cache;
pub mod config;
pub mod engine;
pub mod notify;
pub mod observability;
pub mod prelude;
pub mod quota;
pub mod tiers;
pub mod usage;
pub mod workflow;

use std::time::Duration;

// Re-exports for convenience
pub use backend::{
    BackendError, HttpSubscriptionBackend, QuotaStatus, ResourceStatus, StatusSync,
    SubscribeRequest, Subscription, SubscriptionBackend, SubscriptionStatus,
};
pub use billing::{ProrationCalculator, ProrationResult};
pub use cache::{CacheError, CacheRecord, FileCache};
pub use config::{
    ConfigError, ConfigProvider, EngineConfig, EnvConfigProvider, LayeredConfigProvider,
    MemoryConfigProvider,
};
pub use engine::{QuotaEngine, QuotaEngineBuilder};
pub use notify::{
    EventBus, GraceExpired, NotificationDispatcher, QuotaEvent, QuotaExceeded, TierChanged,
    UsageAlert,
};
pub use observability::{MetricsSummary, QuotaMetrics};
pub use quota::{
    Admitted, GraceStatus, ProspectiveAction, QuotaDecision, QuotaGuard, ResourceDecision,
};
pub use tiers::{
    BillingCycle, CatalogError, Feature, Limit, Resource, Tier, TierCatalog, builtin_catalog,
};
pub use usage::{
    Severity, SeverityClassifier, Thresholds, UsageCounters, UsageSnapshot, UsageStore,
};
pub use workflow::{
    Acknowledgements, ChangeReview, OverLimitPolicy, ReviewSeverity, ReviewWarning,
    TierChangeWorkflow, WorkflowState,
};

/// Error type for tier-quota operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Caller input is invalid. The message is safe to show to end users.
    #[error("{0}")]
    Validation(String),

    /// A consumption request was denied.
    #[error("{message}")]
    QuotaExceeded {
        resource: Resource,
        limit: u64,
        current: u64,
        requested: i64,
        message: String,
    },

    /// No usage account is open for the subscriber.
    #[error("Subscriber not found: {subscriber_id}")]
    SubscriberNotFound { subscriber_id: String },

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Subscription backend could not be reached or answered with a server error.
    #[error("Subscription service unavailable: {0}")]
    Unavailable(String),

    /// Subscription backend refused the request.
    #[error("Subscription service rejected the request (HTTP {status}): {message}")]
    ServerRejection { status: u16, message: String },

    /// Local state contradicts the tier catalog or itself.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Workflow action is not valid in the current state.
    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    /// Operation exceeded timeout.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad caller input or an action the workflow does not allow right now
    Validation,
    /// Quota denials
    ResourceLimit,
    /// Network, availability or timeout errors that may succeed on retry
    Transient,
    /// The backend refused; the user may fix the cause and retry
    Rejected,
    /// Local state is inconsistent; retrying will not help
    Integrity,
    /// Configuration or setup errors
    Configuration,
    /// Internal errors (IO, JSON)
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) | Error::InvalidTransition { .. } => ErrorCategory::Validation,

            Error::QuotaExceeded { .. } => ErrorCategory::ResourceLimit,

            Error::Network(_) | Error::Unavailable(_) | Error::Timeout(_) => {
                ErrorCategory::Transient
            }

            Error::ServerRejection { .. } => ErrorCategory::Rejected,

            Error::InvariantViolation(_) | Error::SubscriberNotFound { .. } => {
                ErrorCategory::Integrity
            }

            Error::Config(_) => ErrorCategory::Configuration,

            Error::Json(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Rejected
        )
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.category() == ErrorCategory::ResourceLimit
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::ServerRejection { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for end users. Backend rejection messages pass through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Error::ServerRejection { message, .. }
            | Error::QuotaExceeded { message, .. }
            | Error::Validation(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<backend::BackendError> for Error {
    fn from(err: backend::BackendError) -> Self {
        match err {
            backend::BackendError::Network(e) => Error::Network(e),
            backend::BackendError::Unavailable(message) => Error::Unavailable(message),
            backend::BackendError::ServerRejection { status, message } => {
                Error::ServerRejection { status, message }
            }
            backend::BackendError::Decode(e) => Error::Json(e),
            backend::BackendError::Url(e) => Error::Config(format!("Invalid backend URL: {}", e)),
        }
    }
}

impl From<cache::CacheError> for Error {
    fn from(err: cache::CacheError) -> Self {
        match err {
            cache::CacheError::Io(e) => Error::Io(e),
            cache::CacheError::Json(e) => Error::Json(e),
        }
    }
}

impl From<tiers::CatalogError> for Error {
    fn from(err: tiers::CatalogError) -> Self {
        match err {
            tiers::CatalogError::NotFound { id } => Error::Validation(format!("Unknown tier: {}", id)),
            other => Error::Config(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound { key } => {
                Error::Config(format!("Key not found: {}", key))
            }
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Env(e) => Error::Config(e.to_string()),
            config::ConfigError::ValidationErrors(errors) => Error::Config(errors.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidTransition {
            from: "reviewing_changes",
            action: "confirm",
        };
        assert_eq!(err.to_string(), "Cannot confirm while reviewing_changes");

        let err = Error::ServerRejection {
            status: 402,
            message: "Card declined".to_string(),
        };
        assert!(err.to_string().contains("402"));
        assert_eq!(err.user_message(), "Card declined");
        assert_eq!(err.status_code(), Some(402));
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Unavailable("503".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(
            Error::ServerRejection {
                status: 402,
                message: "Card declined".into()
            }
            .is_retryable()
        );

        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::InvariantViolation("unknown tier".into()).is_retryable());
        assert!(
            !Error::SubscriberNotFound {
                subscriber_id: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_quota_exceeded_category() {
        let err = Error::QuotaExceeded {
            resource: Resource::Storage,
            limit: 100,
            current: 80,
            requested: 25,
            message: "Storage limit exceeded".into(),
        };
        assert!(err.is_quota_exceeded());
        assert_eq!(err.category(), ErrorCategory::ResourceLimit);
        assert_eq!(err.user_message(), "Storage limit exceeded");
    }

    #[test]
    fn test_conversions() {
        let err: Error = config::ConfigError::NotFound {
            key: "event_capacity".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Config(_)));

        let err: Error = tiers::CatalogError::NotFound { id: "gold".into() }.into();
        assert!(matches!(err, Error::Validation(ref m) if m == "Unknown tier: gold"));

        let err: Error = backend::BackendError::rejection(409, "Already subscribed").into();
        assert!(matches!(err, Error::ServerRejection { status: 409, .. }));
    }
}
