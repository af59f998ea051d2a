//! Reseeding configuration.
//!
//! Durations are written as integer milliseconds in configuration files.

use crate::beacon::duration_millis;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the sentinel does when a fetch (or the pulse it returns) fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop polling and keep the last generator in place.
    #[default]
    Halt,
    /// Keep polling, doubling the delay after each consecutive failure.
    Retry {
        /// Delay after the first failure.
        #[serde(rename = "initial_backoff_ms", with = "duration_millis")]
        initial_backoff: Duration,
        /// Ceiling on the doubled delay.
        #[serde(rename = "max_backoff_ms", with = "duration_millis")]
        max_backoff: Duration,
    },
}

impl FailurePolicy {
    /// Retry with a 500 ms initial delay capped at 30 s.
    pub fn retry() -> Self {
        Self::Retry {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Configuration for a reseeding generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReseedConfig {
    /// How long `create` waits for the first pulse.
    #[serde(rename = "ready_timeout_ms", with = "duration_millis")]
    pub ready_timeout: Duration,
    /// Sleep granularity between polls; bounds stop latency.
    #[serde(rename = "poll_tick_ms", with = "duration_millis")]
    pub poll_tick: Duration,
    /// Fetch failure handling.
    pub failure_policy: FailurePolicy,
}

impl Default for ReseedConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            poll_tick: Duration::from_millis(100),
            failure_policy: FailurePolicy::Halt,
        }
    }
}

impl ReseedConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_tick.is_zero() {
            return Err(ConfigError::InvalidPollTick);
        }
        if let FailurePolicy::Retry {
            initial_backoff,
            max_backoff,
        } = self.failure_policy
        {
            if initial_backoff.is_zero() || max_backoff < initial_backoff {
                return Err(ConfigError::InvalidBackoff);
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// `poll_tick` is zero.
    #[error("poll tick must be non-zero")]
    InvalidPollTick,
    /// Retry backoff is zero or inverted.
    #[error("retry backoff must be non-zero and max must not be below initial")]
    InvalidBackoff,
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// `[reseed]` table.
    #[serde(default)]
    pub reseed: ReseedConfig,
    /// `[beacon]` table.
    #[serde(default)]
    pub beacon: BeaconConfig,
    /// `[output]` table.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Pulse source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BeaconConfig {
    /// JSON file of pulses to replay.
    pub pulses: Option<PathBuf>,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Values drawn and printed after each pulse.
    pub draws_per_pulse: u32,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            draws_per_pulse: 4,
            metrics_port: crate::metrics::DEFAULT_METRICS_PORT,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.reseed.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ReseedConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ready_timeout, Duration::from_secs(60));
        assert_eq!(config.failure_policy, FailurePolicy::Halt);
    }

    #[test]
    fn test_zero_tick_invalid() {
        let config = ReseedConfig {
            poll_tick: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollTick)
        ));
    }

    #[test]
    fn test_inverted_backoff_invalid() {
        let config = ReseedConfig {
            failure_policy: FailurePolicy::Retry {
                initial_backoff: Duration::from_secs(10),
                max_backoff: Duration::from_secs(1),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackoff)
        ));
    }

    #[test]
    fn test_parse_toml_with_retry_policy() {
        let config = FileConfig::from_toml(
            r#"
            [reseed]
            poll_tick_ms = 50

            [reseed.failure_policy]
            mode = "retry"
            initial_backoff_ms = 250
            max_backoff_ms = 4000

            [beacon]
            pulses = "pulses.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.reseed.poll_tick, Duration::from_millis(50));
        assert_eq!(config.reseed.ready_timeout, Duration::from_secs(60));
        assert_eq!(
            config.reseed.failure_policy,
            FailurePolicy::Retry {
                initial_backoff: Duration::from_millis(250),
                max_backoff: Duration::from_secs(4),
            }
        );
        assert_eq!(config.beacon.pulses, Some(PathBuf::from("pulses.json")));
        assert_eq!(config.output.draws_per_pulse, 4);
    }

    #[test]
    fn test_parse_toml_rejects_zero_tick() {
        let result = FileConfig::from_toml("[reseed]\npoll_tick_ms = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidPollTick)));
    }
}
