//! External subscription backend.
//!
//! The backend is the system of record for subscriptions and usage; local
//! projections stay advisory until reconciled against [`QuotaStatus`].

mod http;
mod sync;
mod types;

pub use http::{DEFAULT_REQUEST_TIMEOUT, HttpSubscriptionBackend};
pub use sync::StatusSync;
pub use types::{QuotaStatus, ResourceStatus, SubscribeRequest, Subscription, SubscriptionStatus};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure talking to the HTTP backend.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Backend unreachable for a non-HTTP reason.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Non-success response; `message` is the server's text, verbatim.
    #[error("Server rejected request (HTTP {status}): {message}")]
    ServerRejection { status: u16, message: String },

    #[error("Invalid backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),
}

impl BackendError {
    pub fn rejection(status: u16, message: impl Into<String>) -> Self {
        Self::ServerRejection {
            status,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Subscription operations for one authenticated subscriber.
#[async_trait]
pub trait SubscriptionBackend: Send + Sync {
    async fn subscribe(&self, request: &SubscribeRequest) -> BackendResult<Subscription>;

    async fn my_subscription(&self) -> BackendResult<Subscription>;

    async fn quota_status(&self) -> BackendResult<QuotaStatus>;
}
