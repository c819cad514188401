//! Configuration loading and typed config structures for the cycle logger.
//!
//! The configuration normally lives in `cyclelog.yaml` next to the host
//! program. Every field has a default, so an empty document (or no file at
//! all) yields a working recording setup with console capture enabled.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

/// Environment variable that overrides [`ConsoleConfig::echo`].
pub const ENV_CONSOLE_ECHO: &str = "CYCLELOG_CONSOLE_ECHO";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level logger configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggerConfig {
    /// Console capture settings.
    #[serde(default)]
    pub console: ConsoleConfig,

    /// Run metadata written into the metadata table at start.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Signal-to-key mappings written into `LogMetadata` at start, for
    /// example `EnabledKey: "/DriverStation/Enabled"`.
    #[serde(default)]
    pub signal_keys: BTreeMap<String, String>,
}

impl LoggerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CYCLELOG_CONSOLE_ECHO` overrides `console.echo` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.console.apply_env_overrides();
        Ok(config)
    }
}

/// Console capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsoleConfig {
    /// Whether console text is captured into the log at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether captured text is also forwarded to the real stdout/stderr.
    #[serde(default = "default_true")]
    pub echo: bool,

    /// Hold back an unterminated trailing line until a later cycle
    /// completes it. When false, every new byte is published immediately.
    #[serde(default = "default_true")]
    pub retain_partial_lines: bool,
}

impl ConsoleConfig {
    /// Apply the `CYCLELOG_CONSOLE_ECHO` override when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(ENV_CONSOLE_ECHO) {
            self.echo = parse_flag(&val).unwrap_or(self.echo);
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            echo: true,
            retain_partial_lines: true,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

const fn default_true() -> bool {
    true
}
