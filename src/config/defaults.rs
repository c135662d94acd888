//! Built-in station defaults (layer 1)

use serde::Serialize;
use station_classifier::RulesConfig;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize)]
pub struct BuiltinDefaults {
    /// Control script invoked per device (default: ./remote_control.sh)
    pub script_path: String,

    /// Phase argument passed to the script (default: "2")
    pub script_phase: String,

    /// Marker searched in the script's trailing output (default: "succeed")
    pub script_marker: String,

    /// Number of trailing output lines scanned (default: 3)
    pub script_tail_lines: usize,

    /// Capture patterns and required count
    pub rules: RulesConfig,

    /// Watchdog for a whole device run in seconds (default: 600)
    pub watchdog_overall_seconds: u64,

    /// Log level (default: "info")
    pub log_level: String,

    /// Log format (default: "pretty")
    pub log_format: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            script_path: "./remote_control.sh".to_string(),
            script_phase: "2".to_string(),
            script_marker: "succeed".to_string(),
            script_tail_lines: 3,
            rules: RulesConfig::default(),
            watchdog_overall_seconds: 600,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Layer value in the same shape as `station.toml`
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "script": {
                "path": self.script_path,
                "phase": self.script_phase,
                "marker": self.script_marker,
                "tail_lines": self.script_tail_lines,
            },
            "rules": {
                "primary_camera": self.rules.primary_camera,
                "secondary_camera": self.rules.secondary_camera,
                "dual_camera_calibration": self.rules.dual_camera_calibration,
                "required_count": self.rules.required_count,
            },
            "verifier": {},
            "watchdog": {
                "overall_seconds": self.watchdog_overall_seconds,
            },
            "log": {
                "level": self.log_level,
                "format": self.log_format,
            }
        })
    }
}
