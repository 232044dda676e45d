//! # Bus Configuration
//!
//! `BusConfig` can be built three ways:
//!
//! - [`BusConfig::default`] for tests and embedded use
//! - [`BusConfig::from_env`] for explicit `COURIER_*` overrides on top of defaults
//! - [`BusConfig::load`] for layered loading: defaults, then an optional
//!   configuration file (format inferred from its extension), then `COURIER_*`
//!   environment variables

use crate::constants::{defaults, env};
use crate::registry::Lifetime;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigurationError {
    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Identifies this host in logs and on every persisted envelope
    pub host_id: String,
    pub environment: String,
    /// Timeout propagated to handler contexts; handlers decide how to honor it
    pub default_timeout_ms: u64,
    /// Lifetime used for handlers and interceptors registered without one
    pub handler_lifetime: Lifetime,
    /// Fail bus construction when a handler declares an interceptor nobody registered
    pub strict_interceptors: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host_id: defaults::HOST_ID.to_string(),
            environment: defaults::ENVIRONMENT.to_string(),
            default_timeout_ms: defaults::TIMEOUT_MS,
            handler_lifetime: Lifetime::default(),
            strict_interceptors: false,
        }
    }
}

impl BusConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the process environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(host_id) = lookup(env::HOST_ID) {
            config.host_id = host_id;
        }

        if let Some(environment) =
            lookup(env::ENVIRONMENT).or_else(|| lookup(env::FALLBACK_ENVIRONMENT))
        {
            config.environment = environment;
        }

        if let Some(timeout) = lookup(env::DEFAULT_TIMEOUT_MS) {
            config.default_timeout_ms = timeout.parse().map_err(|e| {
                ConfigurationError::invalid_value(env::DEFAULT_TIMEOUT_MS, format!("{e}"))
            })?;
        }

        if let Some(lifetime) = lookup(env::HANDLER_LIFETIME) {
            config.handler_lifetime = lifetime
                .parse()
                .map_err(|e: String| ConfigurationError::invalid_value(env::HANDLER_LIFETIME, e))?;
        }

        if let Some(strict) = lookup(env::STRICT_INTERCEPTORS) {
            config.strict_interceptors = strict.parse().map_err(|e| {
                ConfigurationError::invalid_value(env::STRICT_INTERCEPTORS, format!("{e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_prefix(path, env::CONFIG_PREFIX)
    }

    /// Layered load with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> ConfigResult<Self> {
        let defaults = Config::try_from(&Self::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading bus configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(prefix).try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.host_id.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "host_id",
                "must not be empty",
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "default_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.host_id, "courier-host");
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.handler_lifetime, Lifetime::PerDispatch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = BusConfig::from_lookup(lookup(&[
            (env::HOST_ID, "worker-7"),
            (env::DEFAULT_TIMEOUT_MS, "1500"),
            (env::HANDLER_LIFETIME, "singleton"),
            (env::FALLBACK_ENVIRONMENT, "production"),
        ]))
        .unwrap();

        assert_eq!(config.host_id, "worker-7");
        assert_eq!(config.default_timeout_ms, 1500);
        assert_eq!(config.handler_lifetime, Lifetime::Singleton);
        assert_eq!(config.environment, "production");
    }

    #[test]
    fn test_invalid_timeout_is_reported() {
        let result = BusConfig::from_lookup(lookup(&[(env::DEFAULT_TIMEOUT_MS, "soon")]));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { ref key, .. }) if key == env::DEFAULT_TIMEOUT_MS
        ));

        let result = BusConfig::from_lookup(lookup(&[(env::DEFAULT_TIMEOUT_MS, "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "host_id = \"file-host\"\ndefault_timeout_ms = 250\nhandler_lifetime = \"transient\""
        )
        .unwrap();

        let config =
            BusConfig::load_with_prefix(Some(file.path()), "COURIER_TEST_FILE_LOAD").unwrap();
        assert_eq!(config.host_id, "file-host");
        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.handler_lifetime, Lifetime::Transient);
        assert!(!config.strict_interceptors);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = BusConfig::load_with_prefix(None, "COURIER_TEST_NO_FILE").unwrap();
        assert_eq!(config, BusConfig::default());
    }
}
