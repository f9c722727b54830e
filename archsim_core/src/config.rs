//! Simulation configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tuning for the user-retention leaky integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Starting retention (default: 1.0)
    pub initial: f64,

    /// Lower clamp (default: 0.1)
    pub floor: f64,

    /// Upper clamp (default: 1.0)
    pub ceiling: f64,

    /// Scores at or above this count as healthy (default: 95.0)
    pub healthy_score: f64,

    /// Per-tick loss while unhealthy (default: 0.005)
    pub decay: f64,

    /// Per-tick gain while healthy (default: 0.002)
    pub recovery: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            initial: 1.0,
            floor: 0.1,
            ceiling: 1.0,
            healthy_score: 95.0,
            decay: 0.005,
            recovery: 0.002,
        }
    }
}

/// Configuration for a simulation session and its tick driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Wall-clock period of one tick in milliseconds (default: 1000)
    pub tick_interval_ms: u64,

    /// Maximum number of event log entries kept (default: 50)
    pub log_capacity: usize,

    /// RAM usage percentage treated as out-of-memory (default: 100.0)
    pub oom_threshold_pct: f64,

    pub retention: RetentionConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            log_capacity: 50,
            oom_threshold_pct: 100.0,
            retention: RetentionConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The tick period as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Rejects values the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::Invalid("log_capacity must be positive".into()));
        }
        if !(self.oom_threshold_pct > 0.0) {
            return Err(ConfigError::Invalid("oom_threshold_pct must be positive".into()));
        }

        let r = &self.retention;
        if !(r.floor <= r.ceiling) {
            return Err(ConfigError::Invalid(format!(
                "retention floor {} exceeds ceiling {}",
                r.floor, r.ceiling
            )));
        }
        if !(r.decay >= 0.0 && r.recovery >= 0.0) {
            return Err(ConfigError::Invalid("retention step sizes must be non-negative".into()));
        }
        if !(r.floor..=r.ceiling).contains(&r.initial) {
            return Err(ConfigError::Invalid(format!(
                "retention initial {} outside [{}, {}]",
                r.initial, r.floor, r.ceiling
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.log_capacity, 50);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            SimulationConfig::from_json_str(r#"{"tick_interval_ms": 250, "retention": {"decay": 0.01}}"#)
                .unwrap();

        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.retention.decay, 0.01);
        assert_eq!(config.retention.recovery, 0.002);
        assert_eq!(config.log_capacity, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SimulationConfig::from_json_str(r#"{"log_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SimulationConfig::from_json_str(r#"{"retention": {"floor": 0.9, "ceiling": 0.5}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SimulationConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
