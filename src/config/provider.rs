//! Configuration Provider Trait

use std::str::FromStr;

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Read-only source of raw configuration values.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Get a raw configuration value
    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    /// List keys matching a prefix
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Typed access on top of [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Parse a plain value (`"30"`, `"grace"`) via `FromStr`.
    fn get_parsed<T>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        T: FromStr + Send,
        T::Err: std::fmt::Display,
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
                None => Ok(None),
            }
        }
    }

    /// Decode a JSON-encoded value.
    fn get_json<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => {
                    let value: T =
                        serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                            key: key.to_string(),
                            message: e.to_string(),
                        })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}

/// Chains providers; the first one holding a key wins.
#[derive(Default)]
pub struct LayeredConfigProvider {
    layers: Vec<Box<dyn ConfigProvider>>,
}

impl LayeredConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lower-priority layer.
    pub fn layer(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.layers.push(Box::new(provider));
        self
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for LayeredConfigProvider {
    fn name(&self) -> &str {
        "layered"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for layer in &self.layers {
            if let Some(value) = layer.get_raw(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let mut keys = std::collections::BTreeSet::new();
        for layer in &self.layers {
            keys.extend(layer.list_keys(prefix).await?);
        }
        Ok(keys.into_iter().collect())
    }
}

impl std::fmt::Debug for LayeredConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredConfigProvider")
            .field("layers", &self.layer_names())
            .finish()
    }
}
