//! Shared fixtures for station integration tests
//!
//! - Control and verifier scripts written into scratch directories
//! - Capture directories populated to satisfy (or break) the rules
//! - Station config pointing at a generated script

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use nebula_station::StationConfig;

/// Script that reports success in its last lines
pub const SUCCEED_SCRIPT: &str = r#"echo "remote control for $1 phase $2"
echo "capturing into $3"
printf 'Remote Control SUCCEED\r\n'"#;

/// Script that never prints the marker
pub const SILENT_SCRIPT: &str = r#"echo "remote control for $1"
echo "device did not answer""#;

/// Capture names satisfying the default rules (3 + 2 + 1)
pub const CAPTURES: [&str; 6] = [
    "main_cam_0.jpg",
    "main_cam_1.jpg",
    "main_cam_2.jpg",
    "sub_cam_0.jpg",
    "sub_cam_1.jpg",
    "otp_dual_cam_calib.bin",
];

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Fill `dir` with a complete capture set.
pub fn populate_captures(dir: &Path) {
    for name in CAPTURES {
        fs::write(dir.join(name), b"capture").unwrap();
    }
}

/// Default station config running `script`.
pub fn station_config(script: &Path) -> StationConfig {
    let mut config = StationConfig::default();
    config.script.path = script.to_path_buf();
    config
}
