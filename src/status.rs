//! Staged status reporting toward the display layer.
//!
//! A [`DeviceJob`](crate::job::DeviceJob) reports each pipeline stage to a
//! [`StatusSink`] handed to it at construction. Sinks may fail; a failed
//! report aborts the remaining pipeline (the final result is still sent).

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::ErrorCode;

/// Pipeline stage a status notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Device attached, run starting.
    Attached,
    /// Control script finished and its session was released.
    RemoteControlled,
    /// Verification algorithm processed; value is its verdict.
    ProcessResult,
    /// Verification algorithm deinitialized; value repeats the verdict.
    Deinitialized,
    /// Aggregate outcome of the whole run. Sent exactly once per run.
    FinalResult,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Attached => "ATTACHED",
            Stage::RemoteControlled => "REMOTE_CONTROLLED",
            Stage::ProcessResult => "PROCESS_RESULT",
            Stage::Deinitialized => "DEINITIALIZED",
            Stage::FinalResult => "FINAL_RESULT",
        };
        f.pad(name)
    }
}

/// A single status notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub device: String,
    pub stage: Stage,
    pub value: bool,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(device: &str, stage: Stage, value: bool) -> Self {
        Self {
            device: device.to_string(),
            stage,
            value,
            at: Utc::now(),
        }
    }
}

/// Status sink errors.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status receiver disconnected")]
    Disconnected,

    #[error("status sink rejected {stage} for {device}: {message}")]
    Rejected {
        device: String,
        stage: Stage,
        message: String,
    },
}

impl StatusError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Propagated
    }
}

/// Receiver of staged status notifications.
pub trait StatusSink: Send + Sync {
    fn report(&self, device: &str, stage: Stage, value: bool) -> Result<(), StatusError>;
}

/// Writes every notification as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn report(&self, device: &str, stage: Stage, value: bool) -> Result<(), StatusError> {
        info!(device = %device, stage = %stage, value, "status");
        Ok(())
    }
}

/// Forwards notifications over a channel to a consumer thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<StatusEvent>) -> Self {
        Self { tx }
    }
}

impl StatusSink for ChannelSink {
    fn report(&self, device: &str, stage: Stage, value: bool) -> Result<(), StatusError> {
        self.tx
            .send(StatusEvent::new(device, stage, value))
            .map_err(|_| StatusError::Disconnected)
    }
}

/// Records notifications in memory.
///
/// Optionally rejects one stage to exercise failure paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<StatusEvent>>,
    reject: Option<Stage>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that fails every report of `stage` (after recording nothing).
    pub fn rejecting(stage: Stage) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            reject: Some(stage),
        }
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded stages paired with their values, in order.
    pub fn stages(&self) -> Vec<(Stage, bool)> {
        self.events().iter().map(|e| (e.stage, e.value)).collect()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.events().iter().filter(|e| e.stage == stage).count()
    }
}

impl StatusSink for MemorySink {
    fn report(&self, device: &str, stage: Stage, value: bool) -> Result<(), StatusError> {
        if self.reject == Some(stage) {
            return Err(StatusError::Rejected {
                device: device.to_string(),
                stage,
                message: "rejected by sink".to_string(),
            });
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StatusEvent::new(device, stage, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};

    #[test]
    fn test_stage_display_matches_serde() {
        let json = serde_json::to_string(&Stage::RemoteControlled).unwrap();
        assert_eq!(json, format!("\"{}\"", Stage::RemoteControlled));
    }

    #[test]
    fn test_log_sink_accepts_every_stage() {
        let sink: Arc<dyn StatusSink> = Arc::new(LogSink);
        for stage in [Stage::Attached, Stage::RemoteControlled, Stage::FinalResult] {
            assert!(sink.report("dut-1", stage, true).is_ok());
            assert!(sink.report("dut-1", stage, false).is_ok());
        }
    }

    #[test]
    fn test_channel_sink_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.report("dev0", Stage::Attached, true).unwrap();

        let event = rx.recv().unwrap();
        assert_eq!(event.device, "dev0");
        assert_eq!(event.stage, Stage::Attached);
        assert!(event.value);
    }

    #[test]
    fn test_channel_sink_disconnected() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        let err = sink.report("dev0", Stage::FinalResult, false).unwrap_err();
        assert!(matches!(err, StatusError::Disconnected));
        assert_eq!(err.code(), ErrorCode::Propagated);
    }

    #[test]
    fn test_memory_sink_rejects_configured_stage() {
        let sink = MemorySink::rejecting(Stage::ProcessResult);
        sink.report("dev0", Stage::Attached, true).unwrap();
        assert!(sink.report("dev0", Stage::ProcessResult, true).is_err());
        assert_eq!(sink.stages(), vec![(Stage::Attached, true)]);
    }

    #[test]
    fn test_event_serialization() {
        let event = StatusEvent::new("cam-1", Stage::FinalResult, true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["device"], "cam-1");
        assert_eq!(json["stage"], "FINAL_RESULT");
        assert_eq!(json["value"], true);
    }
}
