//! Pool configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Weights of the assignment score. They are expected to sum to 1.0 but this
/// is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Weight of free capacity (`1 - load / max_load`).
    pub load: f64,
    /// Weight of the fraction of required skills matched.
    pub skill: f64,
    /// Weight of the agent's rolling success rate.
    pub success: f64,
    /// Weight of `estimated_cost / agent.average_cost`.
    pub cost: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            load: 0.3,
            skill: 0.4,
            success: 0.2,
            cost: 0.1,
        }
    }
}

/// Pool-wide settings. Every field has a default, so a config file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Retries per task before a failure becomes permanent.
    pub max_retries: u32,

    /// Max concurrent tasks for agents registered without an explicit limit.
    pub default_max_load: u32,

    /// Starting value of an agent's rolling average cost per task.
    pub default_average_cost: f64,

    /// EMA weight of the newest outcome in the agent success rate.
    pub success_rate_alpha: f64,

    /// EMA weight of the newest completed task in the agent average cost.
    pub average_cost_alpha: f64,

    pub weights: ScoringWeights,

    /// Load ratio above which an agent counts as overloaded.
    pub overload_threshold: f64,

    /// Load ratio below which an agent counts as underloaded.
    pub underload_threshold: f64,

    pub rebalance_interval_secs: u64,
    pub metrics_interval_secs: u64,

    /// Queue depth above which `add_task` logs a warning. Tasks are still
    /// accepted.
    pub soft_queue_limit: usize,

    /// Fraction of a completed task's estimated cost counted as saved when the
    /// task shared context.
    pub context_savings_ratio: f64,

    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_max_load: 3,
            default_average_cost: 1000.0,
            success_rate_alpha: 0.1,
            average_cost_alpha: 0.1,
            weights: ScoringWeights::default(),
            overload_threshold: 0.8,
            underload_threshold: 0.5,
            rebalance_interval_secs: 30,
            metrics_interval_secs: 5,
            soft_queue_limit: 1000,
            context_savings_ratio: 0.3,
            event_capacity: 256,
        }
    }
}

impl PoolConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("success_rate_alpha", self.success_rate_alpha),
            ("average_cost_alpha", self.average_cost_alpha),
            ("context_savings_ratio", self.context_savings_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: format!("must be within [0, 1], got {value}"),
                });
            }
        }
        if self.underload_threshold > self.overload_threshold {
            return Err(ConfigError::InvalidValue {
                key: "underload_threshold",
                message: format!(
                    "must not exceed overload_threshold ({} > {})",
                    self.underload_threshold, self.overload_threshold
                ),
            });
        }
        if self.default_average_cost <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "default_average_cost",
                message: "must be positive".to_string(),
            });
        }
        if self.rebalance_interval_secs == 0 || self.metrics_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "interval",
                message: "timer intervals must be at least one second".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_capacity",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}
