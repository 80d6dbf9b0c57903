//! Configuration for the dataflow runtime.
//!
//! All settings have defaults, so an empty TOML document is a valid
//! configuration. Values are checked by [`DataflowConfig::validate`] before
//! a runtime is built from them.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};

/// Configuration for a worker thread pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPoolConfig {
    /// Number of worker threads
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Name prefix for worker threads
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Whether to collect task statistics
    #[serde(default = "default_collect_stats")]
    pub collect_stats: bool,
}

fn default_max_threads() -> usize {
    num_cpus::get()
}

fn default_thread_name_prefix() -> String {
    "weft-worker".to_string()
}

fn default_collect_stats() -> bool {
    true
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            thread_name_prefix: default_thread_name_prefix(),
            collect_stats: default_collect_stats(),
        }
    }
}

/// Runtime configuration for a parallel group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowConfig {
    /// Worker pool backing the group
    #[serde(default)]
    pub pool: ThreadPoolConfig,

    /// Messages an actor may process in one turn before yielding its worker
    #[serde(default = "default_actor_throughput")]
    pub actor_throughput: usize,

    /// `max_forks` used by operators that do not set one explicitly
    #[serde(default = "default_max_forks")]
    pub default_max_forks: usize,
}

fn default_actor_throughput() -> usize {
    32
}

fn default_max_forks() -> usize {
    1
}

impl Default for DataflowConfig {
    fn default() -> Self {
        Self {
            pool: ThreadPoolConfig::default(),
            actor_throughput: default_actor_throughput(),
            default_max_forks: default_max_forks(),
        }
    }
}

impl DataflowConfig {
    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ConfigurationError::Invalid(format!("failed to parse: {}", e)))?;
        config.validate()?;
        debug!("Loaded dataflow configuration: {:?}", config);
        Ok(config)
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_threads == 0 {
            return Err(
                ConfigurationError::Invalid("pool.max_threads must be at least 1".into()).into(),
            );
        }
        if self.actor_throughput == 0 {
            return Err(
                ConfigurationError::Invalid("actor_throughput must be at least 1".into()).into(),
            );
        }
        if self.default_max_forks == 0 {
            return Err(ConfigurationError::InvalidMaxForks(self.default_max_forks).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let config = DataflowConfig::default();
        assert_eq!(config.pool.max_threads, num_cpus::get());
        assert_eq!(config.pool.thread_name_prefix, "weft-worker");
        assert!(config.pool.collect_stats);
        assert_eq!(config.actor_throughput, 32);
        assert_eq!(config.default_max_forks, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = DataflowConfig::from_toml_str("").unwrap();
        assert_eq!(config, DataflowConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = DataflowConfig::from_toml_str(
            r#"
            actor_throughput = 4

            [pool]
            max_threads = 3
            thread_name_prefix = "pipeline"
            "#,
        )
        .unwrap();

        assert_eq!(config.actor_throughput, 4);
        assert_eq!(config.pool.max_threads, 3);
        assert_eq!(config.pool.thread_name_prefix, "pipeline");
        assert!(config.pool.collect_stats);
        assert_eq!(config.default_max_forks, 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = DataflowConfig::from_toml_str("default_max_forks = 0");
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::InvalidMaxForks(0)))
        ));

        let result = DataflowConfig::from_toml_str("[pool]\nmax_threads = 0");
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::Invalid(_)))
        ));

        let result = DataflowConfig::from_toml_str("actor_throughput = \"fast\"");
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::Invalid(_)))
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = DataflowConfig::default();
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: DataflowConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }
}
