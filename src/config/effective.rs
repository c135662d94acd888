//! Effective station configuration with provenance
//!
//! The effective config records the merged value tree, the sources that
//! contributed to it, and the typed [`StationConfig`] the runtime uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use station_classifier::RulesConfig;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::error::ErrorCode;

/// Upper bound for the run watchdog (one day)
const MAX_WATCHDOG_SECONDS: u64 = 86400;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Origin of a configuration layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// `[script]`: the external control script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub path: PathBuf,
    /// Phase literal passed as the second argument
    pub phase: String,
    /// Case-insensitive marker searched in the trailing output
    pub marker: String,
    /// Number of trailing lines scanned for the marker
    pub tail_lines: usize,
}

/// `[verifier]`: optional external verification program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub program: Option<PathBuf>,
}

/// `[watchdog]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub overall_seconds: u64,
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

/// Typed station configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    pub script: ScriptConfig,
    pub rules: RulesConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    pub watchdog: WatchdogConfig,
    pub log: LogConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        let defaults = BuiltinDefaults::default();
        Self {
            script: ScriptConfig {
                path: PathBuf::from(defaults.script_path),
                phase: defaults.script_phase,
                marker: defaults.script_marker,
                tail_lines: defaults.script_tail_lines,
            },
            rules: defaults.rules,
            verifier: VerifierConfig::default(),
            watchdog: WatchdogConfig {
                overall_seconds: defaults.watchdog_overall_seconds,
            },
            log: LogConfig {
                level: defaults.log_level,
                format: defaults.log_format,
            },
        }
    }
}

impl StationConfig {
    /// Check value bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script.tail_lines == 0 {
            return Err(invalid("script.tail_lines must be positive"));
        }
        if self.script.marker.trim().is_empty() {
            return Err(invalid("script.marker must not be empty"));
        }
        if self.script.phase.is_empty() {
            return Err(invalid("script.phase must not be empty"));
        }
        if self.rules.required_count == 0 {
            return Err(invalid("rules.required_count must be positive"));
        }
        for (key, pattern) in [
            ("rules.primary_camera", &self.rules.primary_camera),
            ("rules.secondary_camera", &self.rules.secondary_camera),
            ("rules.dual_camera_calibration", &self.rules.dual_camera_calibration),
        ] {
            if pattern.is_empty() {
                return Err(invalid(&format!("{} must not be empty", key)));
            }
        }
        if self.watchdog.overall_seconds == 0 || self.watchdog.overall_seconds > MAX_WATCHDOG_SECONDS {
            return Err(invalid(&format!(
                "watchdog.overall_seconds must be in (0, {}]",
                MAX_WATCHDOG_SECONDS
            )));
        }
        if !LOG_LEVELS.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(invalid(&format!(
                "log.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        if !LOG_FORMATS.contains(&self.log.format.as_str()) {
            return Err(invalid(&format!(
                "log.format must be one of {}",
                LOG_FORMATS.join(", ")
            )));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation(message.to_string())
}

/// Effective configuration with provenance
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// Merged value tree
    pub config: Value,

    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,

    /// Typed view of `config`
    #[serde(skip)]
    pub station: StationConfig,
}

impl EffectiveConfig {
    /// Build from the optional config file and CLI overrides.
    ///
    /// An explicitly named file must exist.
    pub fn build(file: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = file {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let station: StationConfig = serde_json::from_value(merged.clone())?;
        station.validate()?;

        Ok(Self {
            created_at: Utc::now(),
            config: merged,
            sources,
            station,
        })
    }

    /// Pretty JSON of the merged config and its sources
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Look up a dot-separated key in the merged tree
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.config, |current, part| current.get(part))
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("invalid UTF-8: {}", e),
    })?;
    let value: Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok((value, digest))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                ErrorCode::NotFound
            }
            _ => ErrorCode::ParamInvalid,
        }
    }
}
