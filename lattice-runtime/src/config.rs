//! Runtime Configuration
//!
//! A small set of knobs shared by every runtime on the process. The
//! configuration is global (unlike the thread-local reactive state) so a host
//! can load it once at startup, typically from a JSON file:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "recursion_limit": 50 }"#)?;
//! lattice_runtime::config::set_config(config);
//! ```

use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Tunable runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times a single job may re-queue itself within one flush
    /// before it is dropped and reported.
    pub recursion_limit: usize,

    /// Forward the same error object to the handler only once per flush.
    pub dedupe_errors: bool,

    /// Cache capacity used by `KeepAlive` components that do not set `max`.
    pub keep_alive_max: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
            dedupe_errors: true,
            keep_alive_max: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(json)?)
    }
}

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

fn get_config() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::default()))
}

/// Snapshot of the active configuration.
pub fn current() -> RuntimeConfig {
    get_config().read().clone()
}

/// Replace the active configuration.
pub fn set_config(config: RuntimeConfig) {
    tracing::debug!(?config, "runtime config updated");
    *get_config().write() = config;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "keep_alive_max": 3 }"#).unwrap();
        assert_eq!(config.keep_alive_max, Some(3));
        assert_eq!(config.recursion_limit, 100);
        assert!(config.dedupe_errors);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = RuntimeConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn default_config_is_active() {
        assert_eq!(current().recursion_limit, RuntimeConfig::default().recursion_limit);
    }
}
