//! Device job state machine
//!
//! IDLE → REMOTE_CONTROL → VERIFYING → SUCCEEDED
//! with FAILED and ABORTED reachable from both active states.
//! A terminal job may begin a new run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// No run has started yet
    Idle,
    /// Control script is running
    RemoteControl,
    /// Verification algorithm is running
    Verifying,
    /// Run finished and the device passed
    Succeeded,
    /// A stage failed or the device did not pass
    Failed,
    /// Stop was requested mid-run
    Aborted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Aborted
        )
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        match (self, target) {
            (JobState::Idle, JobState::RemoteControl) => true,

            (JobState::RemoteControl, JobState::Verifying) => true,
            (JobState::RemoteControl, JobState::Failed) => true,
            (JobState::RemoteControl, JobState::Aborted) => true,

            (JobState::Verifying, JobState::Succeeded) => true,
            (JobState::Verifying, JobState::Failed) => true,
            (JobState::Verifying, JobState::Aborted) => true,

            // New run after a finished one
            (from, JobState::RemoteControl) => from.is_terminal(),

            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job state transition from {from:?} to {to:?}")]
pub struct JobStateError {
    pub from: JobState,
    pub to: JobState,
}

/// Observable status of a device job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub state: JobState,

    /// Identifier of the current (or last) run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    /// Final result of the last finished run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,

    /// Number of runs started
    pub runs: u64,

    pub updated_at: DateTime<Utc>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStatus {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            run_id: None,
            result: None,
            runs: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, to: JobState) -> Result<(), JobStateError> {
        if !self.state.can_transition_to(to) {
            return Err(JobStateError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Enter REMOTE_CONTROL for a fresh run and return its id.
    pub fn begin_run(&mut self) -> Result<Uuid, JobStateError> {
        self.transition(JobState::RemoteControl)?;
        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        self.result = None;
        self.runs += 1;
        Ok(run_id)
    }

    /// Record the final result and move to the matching terminal state.
    pub fn finish(&mut self, state: JobState, result: bool) -> Result<(), JobStateError> {
        self.transition(state)?;
        self.result = Some(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut status = JobStatus::new();
        let run_id = status.begin_run().unwrap();
        assert_eq!(status.run_id, Some(run_id));
        assert_eq!(status.state, JobState::RemoteControl);

        status.transition(JobState::Verifying).unwrap();
        status.finish(JobState::Succeeded, true).unwrap();
        assert!(status.state.is_terminal());
        assert_eq!(status.result, Some(true));
    }

    #[test]
    fn test_abort_from_remote_control() {
        let mut status = JobStatus::new();
        status.begin_run().unwrap();
        status.finish(JobState::Aborted, false).unwrap();
        assert_eq!(status.state, JobState::Aborted);
    }

    #[test]
    fn test_cannot_skip_verification() {
        let mut status = JobStatus::new();
        status.begin_run().unwrap();
        let err = status.finish(JobState::Succeeded, true).unwrap_err();
        assert_eq!(err.from, JobState::RemoteControl);
        assert_eq!(status.result, None);
    }

    #[test]
    fn test_idle_cannot_finish() {
        assert!(!JobState::Idle.can_transition_to(JobState::Failed));
        assert!(!JobState::Idle.can_transition_to(JobState::Verifying));
    }

    #[test]
    fn test_rerun_after_terminal() {
        let mut status = JobStatus::new();
        let first = status.begin_run().unwrap();
        status.finish(JobState::Failed, false).unwrap();

        let second = status.begin_run().unwrap();
        assert_ne!(first, second);
        assert_eq!(status.runs, 2);
        assert_eq!(status.result, None);
    }

    #[test]
    fn test_no_second_run_while_active() {
        let mut status = JobStatus::new();
        status.begin_run().unwrap();
        assert!(status.begin_run().is_err());
    }

    #[test]
    fn test_serialization() {
        let status = JobStatus::new();
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"IDLE\""));
        assert!(!json.contains("run_id"));
    }
}
