//! Runtime configuration.
//!
//! The runtime is configured per thread with [`crate::Runtime::configure`].
//! Configuration can be built in code or parsed from JSON:
//!
//! ```rust
//! use ripple_core::{FlushMode, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_json(r#"{ "flush_mode": "deferred" }"#).unwrap();
//! assert_eq!(config.flush_mode, FlushMode::Deferred);
//! assert_eq!(config.max_flush_iterations, 1000);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How pending effects get flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Nothing runs until the caller invokes [`crate::flush`].
    #[default]
    Manual,

    /// The first write that dirties observers asks the host scheduler to
    /// flush later, so synchronous writes coalesce into one flush.
    Deferred,
}

/// Settings for the thread-local reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// When pending effects run.
    pub flush_mode: FlushMode,

    /// Upper bound on flush iterations before the flush is abandoned.
    /// Effects that keep writing their own sources would otherwise loop
    /// forever.
    pub max_flush_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Manual,
            max_flush_iterations: 1000,
        }
    }
}

/// Errors raised while loading a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_flush_iterations must be greater than zero")]
    ZeroIterations,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flush_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }

    /// Builder-style setter for the flush mode.
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Builder-style setter for the iteration limit.
    pub fn with_max_flush_iterations(mut self, limit: usize) -> Self {
        self.max_flush_iterations = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn parses_all_fields() {
        let config = RuntimeConfig::from_json(
            r#"{ "flush_mode": "deferred", "max_flush_iterations": 8 }"#,
        )
        .unwrap();
        assert_eq!(config.flush_mode, FlushMode::Deferred);
        assert_eq!(config.max_flush_iterations, 8);
    }

    #[test]
    fn rejects_zero_iterations() {
        let err = RuntimeConfig::from_json(r#"{ "max_flush_iterations": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroIterations));
    }

    #[test]
    fn rejects_unknown_modes() {
        let err = RuntimeConfig::from_json(r#"{ "flush_mode": "eager" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
