//! Configuration for the Station Calyx coordinator.

use crate::error::CoordinatorError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the coordinator's pulse cycle and its supporting
/// components. Loaded by layering defaults, an optional `coordinator.toml`,
/// and `STATION_CALYX_*` environment overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Root of the filesystem-mediated workspace all components read and
    /// write under.
    pub root_dir: PathBuf,

    /// Window, in seconds, within which an overseer heartbeat is still
    /// considered fresh.
    ///
    /// Default: 300
    pub telemetry_window: u64,

    /// Seconds an in-flight execution may run before it is considered
    /// stalled and escalated.
    ///
    /// Default: 900
    pub stall_threshold: u64,

    /// Seconds a manifest claim holds exclusivity before it may be
    /// reclaimed.
    ///
    /// Default: 300
    pub manifest_claim_window: u64,

    /// Maximum intents executed within a single pulse.
    ///
    /// Default: 2
    pub max_executions_per_pulse: usize,

    /// Maximum intents returned by prioritization.
    ///
    /// Default: 5
    pub prioritized_limit: usize,

    /// `tracing-subscriber` env-filter directive, e.g. "info" or
    /// "station_calyx=debug".
    ///
    /// Default: "info"
    pub log_level: String,

    /// "json" for structured logs, "pretty" for human-readable.
    ///
    /// Default: "pretty"
    pub log_format: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            telemetry_window: 300,
            stall_threshold: 900,
            manifest_claim_window: 300,
            max_executions_per_pulse: 2,
            prioritized_limit: 5,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root_dir(mut self, root_dir: PathBuf) -> Self {
        self.root_dir = root_dir;
        self
    }

    pub fn with_telemetry_window(mut self, seconds: u64) -> Self {
        self.telemetry_window = seconds;
        self
    }

    pub fn with_log_level(mut self, level: String) -> Self {
        self.log_level = level;
        self
    }

    /// Layer `coordinator.toml` (if present under `root_dir`'s current
    /// directory) and `STATION_CALYX_*` environment variables over
    /// defaults.
    pub fn load() -> Result<Self, CoordinatorError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default()).map_err(config_err)?)
            .add_source(config::File::with_name("coordinator").required(false))
            .add_source(config::Environment::with_prefix("STATION_CALYX").separator("__"));

        let settings = builder.build().map_err(config_err)?;
        let loaded: Self = settings.try_deserialize().map_err(config_err)?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.telemetry_window == 0 {
            return Err(CoordinatorError::Configuration(
                "telemetry_window must be greater than 0".to_string(),
            ));
        }
        if self.stall_threshold == 0 {
            return Err(CoordinatorError::Configuration(
                "stall_threshold must be greater than 0".to_string(),
            ));
        }
        if self.manifest_claim_window == 0 {
            return Err(CoordinatorError::Configuration(
                "manifest_claim_window must be greater than 0".to_string(),
            ));
        }
        if self.max_executions_per_pulse == 0 {
            return Err(CoordinatorError::Configuration(
                "max_executions_per_pulse must be greater than 0".to_string(),
            ));
        }
        if self.prioritized_limit == 0 {
            return Err(CoordinatorError::Configuration(
                "prioritized_limit must be greater than 0".to_string(),
            ));
        }
        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(CoordinatorError::Configuration(
                "log_format must be \"json\" or \"pretty\"".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_err(e: impl std::fmt::Display) -> CoordinatorError {
    CoordinatorError::Configuration(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.telemetry_window, 300);
        assert_eq!(config.stall_threshold, 900);
        assert_eq!(config.max_executions_per_pulse, 2);
    }

    #[test]
    fn builder_pattern_overrides_fields() {
        let config = CoordinatorConfig::new()
            .with_root_dir(PathBuf::from("/tmp/calyx"))
            .with_telemetry_window(60)
            .with_log_level("debug".to_string());

        assert_eq!(config.root_dir, PathBuf::from("/tmp/calyx"));
        assert_eq!(config.telemetry_window, 60);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn zero_telemetry_window_is_invalid() {
        let config = CoordinatorConfig {
            telemetry_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_is_invalid() {
        let config = CoordinatorConfig {
            log_format: "xml".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
