//! Stable error codes shared by every station component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes reported by station operations.
///
/// These codes are stable and used for automation (CLI exit codes, JSON
/// output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad configuration or argument, e.g. a zero wait duration.
    ParamInvalid,
    /// A required artifact (control script, data directory) is missing.
    NotFound,
    /// A worker or process handle could not be allocated.
    OutOfMemory,
    /// File-count mismatch or overall remote-control failure.
    TestFailed,
    /// The component is already running.
    AlreadyRunning,
    /// Failure reported by a collaborator (status sink, algorithm).
    Propagated,
}

impl ErrorCode {
    /// Process exit code for the `station` binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ParamInvalid => 2,
            Self::NotFound => 3,
            Self::OutOfMemory => 4,
            Self::TestFailed => 10,
            Self::AlreadyRunning => 5,
            Self::Propagated => 20,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParamInvalid => write!(f, "PARAM_INVALID"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::OutOfMemory => write!(f, "OUT_OF_MEMORY"),
            Self::TestFailed => write!(f, "TEST_FAILED"),
            Self::AlreadyRunning => write!(f, "ALREADY_RUNNING"),
            Self::Propagated => write!(f, "PROPAGATED"),
        }
    }
}
