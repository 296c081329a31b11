//! Engine settings resolved from a [`ConfigProvider`].

use std::time::Duration;

use url::Url;

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigError, ConfigResult};
use crate::notify::DEFAULT_EVENT_CAPACITY;
use crate::usage::Thresholds;
use crate::workflow::OverLimitPolicy;

pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACE_PERIOD_DAYS: u32 = 14;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    /// Upper bound on one subscription backend call during `Applying`.
    pub apply_timeout: Duration,
    /// Period of background quota-status reconciliation.
    pub sync_interval: Duration,
    pub event_capacity: usize,
    pub over_limit_policy: OverLimitPolicy,
    pub backend_url: Option<Url>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            over_limit_policy: OverLimitPolicy::default(),
            backend_url: None,
        }
    }
}

impl EngineConfig {
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn over_limit_policy(mut self, policy: OverLimitPolicy) -> Self {
        self.over_limit_policy = policy;
        self
    }

    /// Resolve settings, falling back to defaults for missing keys.
    pub async fn load<P: ConfigProvider + ?Sized>(provider: &P) -> ConfigResult<Self> {
        let defaults = Self::default();

        let thresholds = Thresholds {
            caution: provider
                .get_parsed("thresholds.caution")
                .await?
                .unwrap_or(defaults.thresholds.caution),
            warning: provider
                .get_parsed("thresholds.warning")
                .await?
                .unwrap_or(defaults.thresholds.warning),
            critical: provider
                .get_parsed("thresholds.critical")
                .await?
                .unwrap_or(defaults.thresholds.critical),
        };

        let apply_timeout = provider
            .get_parsed::<u64>("apply_timeout_secs")
            .await?
            .map(Duration::from_secs)
            .unwrap_or(defaults.apply_timeout);

        let sync_interval = provider
            .get_parsed::<u64>("sync_interval_secs")
            .await?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sync_interval);

        let event_capacity = provider
            .get_parsed("event_capacity")
            .await?
            .unwrap_or(defaults.event_capacity);

        let grace_days = provider
            .get_parsed::<u32>("grace_period_days")
            .await?
            .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS);

        let over_limit_policy = match provider.get_raw("over_limit_policy").await? {
            None => defaults.over_limit_policy,
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "hard_block" | "block" => OverLimitPolicy::HardBlock,
                "grace" => OverLimitPolicy::Grace { days: grace_days },
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "over_limit_policy".into(),
                        message: format!("expected 'hard_block' or 'grace', got '{}'", other),
                    });
                }
            },
        };

        let backend_url = provider
            .get_parsed::<Url>("backend.url")
            .await?;

        let config = Self {
            thresholds,
            apply_timeout,
            sync_interval,
            event_capacity,
            over_limit_policy,
            backend_url,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.thresholds.validate() {
            errors.push(e);
        }
        if self.apply_timeout.is_zero() {
            errors.push(ConfigError::InvalidValue {
                key: "apply_timeout_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.sync_interval.is_zero() {
            errors.push(ConfigError::InvalidValue {
                key: "sync_interval_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.event_capacity == 0 {
            errors.push(ConfigError::InvalidValue {
                key: "event_capacity".into(),
                message: "must be greater than zero".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::ValidationErrors(super::ValidationErrors(errors))),
        }
    }
}
