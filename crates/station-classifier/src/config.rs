//! Rule configuration types.

use serde::{Deserialize, Serialize};

/// Filename patterns and the expected capture count for one data directory.
///
/// Patterns are matched as case-sensitive substrings of the entry's file
/// name, checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Substring identifying a primary-camera image.
    #[serde(default = "default_primary")]
    pub primary_camera: String,

    /// Substring identifying a secondary-camera image.
    #[serde(default = "default_secondary")]
    pub secondary_camera: String,

    /// Substring identifying a dual-camera calibration artifact.
    #[serde(default = "default_calibration")]
    pub dual_camera_calibration: String,

    /// Exact number of classified entries a directory must hold.
    #[serde(default = "default_required_count")]
    pub required_count: usize,
}

fn default_primary() -> String {
    "main_cam".to_string()
}

fn default_secondary() -> String {
    "sub_cam".to_string()
}

fn default_calibration() -> String {
    "otp_dual_cam_calib".to_string()
}

fn default_required_count() -> usize {
    6
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            primary_camera: default_primary(),
            secondary_camera: default_secondary(),
            dual_camera_calibration: default_calibration(),
            required_count: default_required_count(),
        }
    }
}
