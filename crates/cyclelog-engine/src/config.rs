//! Engine configuration, read from `cyclelog.yaml`.
//!
//! The file holds the logger settings under `logger` and the demo run
//! settings under `run`. Every field has a default.

use std::path::{Path, PathBuf};

use cyclelog_core::config::{ConfigError, LoggerConfig};
use serde::Deserialize;

/// Environment variable that overrides [`RunConfig::recording_path`].
pub const ENV_RECORDING_PATH: &str = "CYCLELOG_RECORDING";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Logger settings shared by the recording and the replay.
    #[serde(default)]
    pub logger: LoggerConfig,

    /// Demo run settings.
    #[serde(default)]
    pub run: RunConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment
    /// overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.logger.console.apply_env_overrides();
        config.run.apply_env_overrides();
        Ok(config)
    }
}

/// Settings of the simulated control loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Number of cycles to record.
    #[serde(default = "default_cycles")]
    pub cycles: u32,

    /// Wall-clock period between recorded cycles.
    #[serde(default = "default_cycle_period_ms")]
    pub cycle_period_ms: u64,

    /// Seed for the simulated sensor noise.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Where the JSON Lines recording is written.
    #[serde(default = "default_recording_path")]
    pub recording_path: PathBuf,
}

impl RunConfig {
    /// Apply the `CYCLELOG_RECORDING` override when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(ENV_RECORDING_PATH) {
            if !val.trim().is_empty() {
                self.recording_path = PathBuf::from(val);
            }
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cycles: default_cycles(),
            cycle_period_ms: default_cycle_period_ms(),
            seed: default_seed(),
            recording_path: default_recording_path(),
        }
    }
}

const fn default_cycles() -> u32 {
    150
}

const fn default_cycle_period_ms() -> u64 {
    20
}

const fn default_seed() -> u64 {
    6328
}

fn default_recording_path() -> PathBuf {
    PathBuf::from("cyclelog-run.jsonl")
}
