//! Environment Variable Configuration Provider
//!
//! Keys map to variables by upper-casing and replacing `.` with `_`:
//! `thresholds.warning` becomes `TIER_QUOTA_THRESHOLDS_WARNING`.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Default variable prefix for engine settings.
pub const DEFAULT_ENV_PREFIX: &str = "TIER_QUOTA_";

/// Read-only environment variable configuration provider.
///
/// Environment variables are treated as immutable at runtime because
/// modifying them is not thread-safe.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl EnvConfigProvider {
    /// Provider with no prefix
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn env_key(&self, key: &str) -> String {
        let suffix = key.to_uppercase().replace('.', "_");
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, suffix),
            None => suffix,
        }
    }

    fn key_from_env(&self, env_name: &str) -> Option<String> {
        let stripped = match &self.prefix {
            Some(prefix) => env_name.strip_prefix(prefix.as_str())?,
            None => env_name,
        };
        Some(stripped.to_lowercase().replace('_', "."))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::prefixed(DEFAULT_ENV_PREFIX)
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let env_prefix = self.env_key(prefix);
        Ok(std::env::vars()
            .filter(|(k, _)| k.starts_with(&env_prefix))
            .filter_map(|(k, _)| self.key_from_env(&k))
            .collect())
    }
}
