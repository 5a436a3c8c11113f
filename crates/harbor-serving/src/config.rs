//! Configuration for the serving subsystem.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// What capacity eviction does when every resident entry is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Insert anyway and log a soft capacity overrun. The table shrinks back
    /// under capacity as soon as a non-busy entry exists.
    #[default]
    Overrun,
    /// Fail the load instead of exceeding capacity.
    Strict,
}

/// Configuration for the model manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServingConfig {
    /// Maximum number of models resident in memory (default: 4).
    #[serde(default = "default_max_resident_models")]
    pub max_resident_models: usize,

    /// Seconds an untouched model stays resident before idle eviction
    /// (default: 600 = 10 minutes).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the health monitor runs in seconds (default: 30).
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Upper bound on a single load attempt in seconds (default: 120).
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// Behavior when capacity eviction finds only busy entries.
    #[serde(default)]
    pub capacity_policy: CapacityPolicy,

    /// Number of metric samples retained per model (default: 256).
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,

    /// Offload decision thresholds.
    #[serde(default)]
    pub offload: OffloadConfig,
}

/// Thresholds used when choosing between local and remote loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OffloadConfig {
    /// A model estimated above this fraction of currently available memory is
    /// offloaded (default: 0.7).
    #[serde(default = "default_memory_fraction")]
    pub memory_fraction: f32,

    /// Accelerator utilization at or above this percentage triggers offload
    /// (default: 90.0).
    #[serde(default = "default_accelerator_threshold_percent")]
    pub accelerator_threshold_percent: f32,
}

fn default_max_resident_models() -> usize {
    4
}

fn default_idle_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_load_timeout_secs() -> u64 {
    120
}

fn default_metrics_window() -> usize {
    256
}

fn default_memory_fraction() -> f32 {
    0.7
}

fn default_accelerator_threshold_percent() -> f32 {
    90.0
}

/// Errors that can occur during serving configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid resident-model capacity (must be > 0).
    #[error("Invalid max resident models: must be greater than 0")]
    InvalidMaxResidentModels,

    /// Invalid health check interval (must be > 0).
    #[error("Invalid health check interval: must be greater than 0")]
    InvalidHealthCheckInterval,

    /// Invalid load timeout (must be > 0).
    #[error("Invalid load timeout: must be greater than 0")]
    InvalidLoadTimeout,

    /// Invalid metrics window (must be > 0).
    #[error("Invalid metrics window: must be greater than 0")]
    InvalidMetricsWindow,

    /// Invalid offload memory fraction (must be within (0, 1]).
    #[error("Invalid offload memory fraction: must be within (0, 1]")]
    InvalidMemoryFraction,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            max_resident_models: default_max_resident_models(),
            idle_timeout_secs: default_idle_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            capacity_policy: CapacityPolicy::default(),
            metrics_window: default_metrics_window(),
            offload: OffloadConfig::default(),
        }
    }
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            memory_fraction: default_memory_fraction(),
            accelerator_threshold_percent: default_accelerator_threshold_percent(),
        }
    }
}

impl ServingConfig {
    /// Validate the serving configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resident_models == 0 {
            return Err(ConfigError::InvalidMaxResidentModels);
        }

        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::InvalidHealthCheckInterval);
        }

        if self.load_timeout_secs == 0 {
            return Err(ConfigError::InvalidLoadTimeout);
        }

        if self.metrics_window == 0 {
            return Err(ConfigError::InvalidMetricsWindow);
        }

        if !(self.offload.memory_fraction > 0.0 && self.offload.memory_fraction <= 1.0) {
            return Err(ConfigError::InvalidMemoryFraction);
        }

        Ok(())
    }

    /// Get the idle timeout as a Duration.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get the health check interval as a Duration.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Get the load timeout as a Duration.
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}
