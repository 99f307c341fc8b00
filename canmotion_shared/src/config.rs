//! Runner configuration shared by the motion core, the simulator harness and tests.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! ignore_stalls = false
//! start_at_index = 0
//!
//! [timeouts]
//! expected_factor = 1.1
//! full_factor = 2.0
//! minimum_timeout_sec = 1.0
//!
//! [rates]
//! stepper = 100000
//! tip_action = 200000
//! brushed = 32000
//! ```
//!
//! Every key is optional; missing keys fall back to the firmware defaults.

use crate::constants::InterruptRates;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunnerConfig {
    #[serde(default)]
    pub timeouts: TimeoutPolicy,
    #[serde(default)]
    pub rates: InterruptRates,
    /// Mirrors the "disable stall detection" feature flag.
    #[serde(default)]
    pub ignore_stalls: bool,
    #[serde(default)]
    pub start_at_index: u8,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            rates: InterruptRates::default(),
            ignore_stalls: false,
            start_at_index: 0,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts.validate()?;
        let rates = &self.rates;
        if rates.stepper == 0 || rates.tip_action == 0 || rates.brushed == 0 {
            return Err(ConfigError::Invalid("Interrupt rates must be > 0".to_string()));
        }
        Ok(())
    }
}

/// How long the dispatcher waits for a move group with a given total duration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct TimeoutPolicy {
    #[serde(default = "default_expected_factor")]
    pub expected_factor: f64,
    #[serde(default = "default_full_factor")]
    pub full_factor: f64,
    #[serde(default = "default_minimum_timeout_sec")]
    pub minimum_timeout_sec: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            expected_factor: default_expected_factor(),
            full_factor: default_full_factor(),
            minimum_timeout_sec: default_minimum_timeout_sec(),
        }
    }
}

impl TimeoutPolicy {
    /// Past this the group is still waited on, but a warning is logged.
    pub fn expected_time(&self, group_duration_sec: f64) -> Duration {
        Duration::from_secs_f64(
            (group_duration_sec * self.expected_factor).max(self.minimum_timeout_sec),
        )
    }

    /// Past this the group is abandoned and fails with a timeout.
    pub fn full_timeout(&self, group_duration_sec: f64) -> Duration {
        Duration::from_secs_f64(
            (group_duration_sec * self.full_factor).max(self.minimum_timeout_sec),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_factor <= 0.0 || self.full_factor <= 0.0 {
            return Err(ConfigError::Invalid("Timeout factors must be > 0".to_string()));
        }
        if self.full_factor < self.expected_factor {
            return Err(ConfigError::Invalid(
                "full_factor must be >= expected_factor".to_string(),
            ));
        }
        if !(self.minimum_timeout_sec > 0.0) {
            return Err(ConfigError::Invalid("minimum_timeout_sec must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_expected_factor() -> f64 { 1.1 }
fn default_full_factor() -> f64 { 2.0 }
fn default_minimum_timeout_sec() -> f64 { 1.0 }

pub fn load_config(path: &str) -> Result<RunnerConfig, ConfigError> {
    let config: RunnerConfig = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
