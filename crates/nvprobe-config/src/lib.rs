//! # nvprobe-config
//!
//! Configuration management for nvprobe.
//!
//! Loads configuration from:
//! 1. `~/.nvprobe/config.toml` (global)
//! 2. `.nvprobe/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Command-line flags are applied on top by the binary.

pub mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use logging::{init_logging, Component, LogLevel};

/// Permission bits for a newly created target: rw-r--r--
pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub heartbeat: HeartbeatConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(Self::PROJECT_CONFIG))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Project config path, relative to the working directory
    pub const PROJECT_CONFIG: &'static str = ".nvprobe/config.toml";

    /// Global config path: ~/.nvprobe/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".nvprobe/config.toml"))
    }

    /// Layer the project file over the global one. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in global.into_iter().chain(std::iter::once(project)) {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let table: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, table);
            }
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Apply `NVPROBE_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup("NVPROBE_HEARTBEAT_SECS") {
            self.heartbeat.interval_secs = secs.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("NVPROBE_HEARTBEAT_SECS: not a number: {secs}"))
            })?;
        }
        if let Some(v) = lookup("NVPROBE_VERIFY") {
            self.probe.verify = parse_bool("NVPROBE_VERIFY", &v)?;
        }
        if let Some(v) = lookup("NVPROBE_SYNC") {
            self.probe.sync = parse_bool("NVPROBE_SYNC", &v)?;
        }
        if let Some(level) = lookup("NVPROBE_LOG") {
            self.log.level = level.parse().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.probe.file_mode > 0o7777 {
            return Err(ConfigError::Invalid(format!(
                "probe.file_mode out of range: {:o}",
                self.probe.file_mode
            )));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!("{key}: not a boolean: {other}"))),
    }
}

/// Recursive overlay: tables merge key by key, everything else is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

/// Write/read probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Permission bits for a newly created target (0o644 = 420)
    pub file_mode: u32,
    /// Fail when the read-back differs from the payload
    pub verify: bool,
    /// fsync the target after writing
    pub sync: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            file_mode: DEFAULT_FILE_MODE,
            verify: true,
            sync: false,
        }
    }
}

/// Idle loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    pub message: String,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            message: "- Sleeping".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
        }
    }
}
