//! Classification and rule-check result types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of capture artifact recognized in a data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureKind {
    /// Image taken by the primary camera.
    PrimaryCamera,
    /// Image taken by the secondary camera.
    SecondaryCamera,
    /// Dual-camera calibration data.
    DualCameraCalibration,
}

/// Tally of one directory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleReport {
    /// Directory that was scanned.
    pub dir: PathBuf,
    /// Number of primary-camera images.
    pub primary_camera: usize,
    /// Number of secondary-camera images.
    pub secondary_camera: usize,
    /// Number of calibration artifacts.
    pub dual_camera_calibration: usize,
    /// Names of entries that matched no pattern.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched: Vec<String>,
    /// Required number of classified entries.
    pub required: usize,
}

impl RuleReport {
    /// Total number of classified entries.
    pub fn matched(&self) -> usize {
        self.primary_camera + self.secondary_camera + self.dual_camera_calibration
    }

    /// True when the classified count equals the required count.
    pub fn passed(&self) -> bool {
        self.matched() == self.required
    }

    pub(crate) fn record(&mut self, kind: CaptureKind) {
        match kind {
            CaptureKind::PrimaryCamera => self.primary_camera += 1,
            CaptureKind::SecondaryCamera => self.secondary_camera += 1,
            CaptureKind::DualCameraCalibration => self.dual_camera_calibration += 1,
        }
    }
}

/// Errors from scanning or checking a data directory.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot read {}: {source}", dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("file count mismatch in {}: found {found}, required {required}", report.dir.display())]
    CountMismatch {
        found: usize,
        required: usize,
        report: RuleReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_matched_and_passed() {
        let mut report = RuleReport {
            required: 3,
            ..Default::default()
        };
        report.record(CaptureKind::PrimaryCamera);
        report.record(CaptureKind::SecondaryCamera);
        assert_eq!(report.matched(), 2);
        assert!(!report.passed());

        report.record(CaptureKind::DualCameraCalibration);
        assert!(report.passed());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&CaptureKind::DualCameraCalibration).unwrap();
        assert_eq!(json, "\"DUAL_CAMERA_CALIBRATION\"");
    }
}
