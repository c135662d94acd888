//! Capture-file classifier for station data directories.
//!
//! After a device has been remote-controlled its data directory must hold
//! an exact number of recognized capture artifacts. This crate classifies
//! directory entries by filename and checks that count.

mod config;
mod result;

pub use config::RulesConfig;
pub use result::{CaptureKind, RuleReport, RulesError};

use std::path::Path;
use walkdir::WalkDir;

/// Classify a single file name.
///
/// Patterns are tried primary, secondary, calibration; the first substring
/// hit wins so an entry is never counted twice.
pub fn classify(name: &str, config: &RulesConfig) -> Option<CaptureKind> {
    let patterns = [
        (&config.primary_camera, CaptureKind::PrimaryCamera),
        (&config.secondary_camera, CaptureKind::SecondaryCamera),
        (&config.dual_camera_calibration, CaptureKind::DualCameraCalibration),
    ];

    patterns
        .into_iter()
        .find(|(pattern, _)| !pattern.is_empty() && name.contains(pattern.as_str()))
        .map(|(_, kind)| kind)
}

/// Scan the immediate entries of `dir` and tally classified names.
///
/// Regular files, hidden entries and subdirectories are considered;
/// symbolic links are skipped. Order of enumeration does not matter.
pub fn scan(dir: &Path, config: &RulesConfig) -> Result<RuleReport, RulesError> {
    if !dir.is_dir() {
        return Err(RulesError::NotADirectory(dir.to_path_buf()));
    }

    let mut report = RuleReport {
        dir: dir.to_path_buf(),
        required: config.required_count,
        ..Default::default()
    };

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false);

    for entry in walker {
        let entry = entry.map_err(|source| RulesError::Scan {
            dir: dir.to_path_buf(),
            source,
        })?;

        if entry.path_is_symlink() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        match classify(&name, config) {
            Some(kind) => report.record(kind),
            None => report.unmatched.push(name.into_owned()),
        }
    }

    Ok(report)
}

/// Check that `dir` holds exactly `config.required_count` classified entries.
pub fn check_rules(dir: &Path, config: &RulesConfig) -> Result<RuleReport, RulesError> {
    let report = scan(dir, config)?;
    if report.passed() {
        Ok(report)
    } else {
        Err(RulesError::CountMismatch {
            found: report.matched(),
            required: report.required,
            report,
        })
    }
}
