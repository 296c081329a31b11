//! reqwest-based subscription backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{QuotaStatus, SubscribeRequest, Subscription};
use super::{BackendError, BackendResult, SubscriptionBackend};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SUBSCRIBE_PATH: &str = "subscriptions/subscribe";
const MY_SUBSCRIPTION_PATH: &str = "subscriptions/my-subscription";
const QUOTA_STATUS_PATH: &str = "subscriptions/quota-status";

/// Subscribe responses come either bare or wrapped in `{"subscription": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SubscriptionEnvelope {
    Wrapped { subscription: Subscription },
    Bare(Subscription),
}

impl SubscriptionEnvelope {
    fn into_inner(self) -> Subscription {
        match self {
            Self::Wrapped { subscription } => subscription,
            Self::Bare(subscription) => subscription,
        }
    }
}

#[derive(Clone)]
pub struct HttpSubscriptionBackend {
    http: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl std::fmt::Debug for HttpSubscriptionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSubscriptionBackend")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl HttpSubscriptionBackend {
    pub fn new(base_url: Url) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_http(base_url, http))
    }

    pub fn with_http(mut base_url: Url, http: reqwest::Client) -> Self {
        // `Url::join` drops the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http,
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<SecretString>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> BackendResult<T> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = rejection_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            tracing::warn!(status = status.as_u16(), %message, "Subscription backend rejected request");
            return Err(BackendError::ServerRejection {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Extract the server's error text: `detail`, then `message`, then `error`, then the raw body.
fn rejection_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return Some(text.to_string());
            }
        }
    }
    Some(body.to_string())
}

#[async_trait]
impl SubscriptionBackend for HttpSubscriptionBackend {
    async fn subscribe(&self, request: &SubscribeRequest) -> BackendResult<Subscription> {
        let url = self.endpoint(SUBSCRIBE_PATH)?;
        tracing::debug!(%url, tier_id = %request.tier_id, "POST subscribe");
        let envelope: SubscriptionEnvelope = self.send(self.http.post(url).json(request)).await?;
        Ok(envelope.into_inner())
    }

    async fn my_subscription(&self) -> BackendResult<Subscription> {
        let url = self.endpoint(MY_SUBSCRIPTION_PATH)?;
        let envelope: SubscriptionEnvelope = self.send(self.http.get(url)).await?;
        Ok(envelope.into_inner())
    }

    async fn quota_status(&self) -> BackendResult<QuotaStatus> {
        let url = self.endpoint(QUOTA_STATUS_PATH)?;
        self.send(self.http.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let backend =
            HttpSubscriptionBackend::new(Url::parse("https://billing.example.com/api").unwrap())
                .unwrap();
        assert_eq!(
            backend.endpoint(QUOTA_STATUS_PATH).unwrap().as_str(),
            "https://billing.example.com/api/subscriptions/quota-status"
        );
    }

    #[test]
    fn test_rejection_message_prefers_detail() {
        assert_eq!(
            rejection_message(r#"{"detail": "Card declined", "message": "x"}"#).as_deref(),
            Some("Card declined")
        );
        assert_eq!(
            rejection_message(r#"{"message": "Plan unavailable"}"#).as_deref(),
            Some("Plan unavailable")
        );
        assert_eq!(rejection_message("Bad Gateway").as_deref(), Some("Bad Gateway"));
        assert_eq!(rejection_message("   "), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let backend = HttpSubscriptionBackend::new(Url::parse("https://b.example.com/").unwrap())
            .unwrap()
            .with_token("super-secret".to_string());
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("authenticated: true"));
    }
}
