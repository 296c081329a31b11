//! Pluggable configuration.
//!
//! ```rust,no_run
//! use tier_quota::config::{EngineConfig, EnvConfigProvider, LayeredConfigProvider, MemoryConfigProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = LayeredConfigProvider::new()
//!     .layer(EnvConfigProvider::default())
//!     .layer(MemoryConfigProvider::new().value("sync_interval_secs", "120"));
//! let config = EngineConfig::load(&provider).await?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod env;
mod memory;
mod provider;

pub use engine::{
    DEFAULT_APPLY_TIMEOUT, DEFAULT_GRACE_PERIOD_DAYS, DEFAULT_SYNC_INTERVAL, EngineConfig,
};
pub use env::{DEFAULT_ENV_PREFIX, EnvConfigProvider};
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt, LayeredConfigProvider};

use thiserror::Error;

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Key not found
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// Multiple validation errors
    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
