//! Remote-control session: runs the station's control script for one device
//! and validates the captured data directory afterwards.
//!
//! A session owns one worker thread. The worker launches the script, waits
//! for it to exit, scans the tail of its output for the success marker and
//! then runs the directory rule check. The completion callback runs before
//! the worker's exit signal fires; both happen exactly once per run no
//! matter how the run ended.

pub mod marker;

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use station_classifier::{check_rules, RuleReport, RulesConfig, RulesError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ScriptConfig, StationConfig};
use crate::error::ErrorCode;
use crate::worker::{StopFlag, Worker, WorkerError};

/// Invoked once when a session run finishes, before its exit signal.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session parameter: {0}")]
    InvalidParam(String),

    #[error("control script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("session already started")]
    AlreadyStarted,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("failed to launch {}: {source}", script.display())]
    Launch {
        script: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to collect script output: {0}")]
    Output(#[source] io::Error),

    #[error("session stopped before the script was launched")]
    Stopped,

    #[error("remote control failed: {reason}")]
    TestFailed {
        reason: String,
        report: Box<SessionReport>,
    },
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::InvalidParam(_) => ErrorCode::ParamInvalid,
            SessionError::ScriptNotFound(_) => ErrorCode::NotFound,
            SessionError::AlreadyStarted => ErrorCode::AlreadyRunning,
            SessionError::Worker(e) => e.code(),
            SessionError::Launch { .. } => ErrorCode::OutOfMemory,
            SessionError::Output(_) => ErrorCode::Propagated,
            SessionError::Stopped | SessionError::TestFailed { .. } => ErrorCode::TestFailed,
        }
    }
}

/// Settings a session needs from the station configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub script: ScriptConfig,
    pub rules: RulesConfig,
}

impl From<&StationConfig> for SessionConfig {
    fn from(config: &StationConfig) -> Self {
        Self {
            script: config.script.clone(),
            rules: config.rules.clone(),
        }
    }
}

/// What one session run observed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    /// Overall outcome: marker found and rules satisfied.
    pub result: bool,
    /// Marker was present in the scanned tail.
    pub marker_found: bool,
    /// Script exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// Number of output lines the script produced.
    pub output_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<RuleReport>,
    /// Last failure recorded during the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionReport {
    fn fail(&mut self, message: impl Into<String>) {
        self.result = false;
        self.error = Some(message.into());
    }
}

/// Runs the completion callback when the worker body ends, even by unwinding.
struct CallbackGuard(Option<CompletionCallback>);

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }
}

/// Supervises one run of the control script for a device.
pub struct RemoteControlSession {
    device: String,
    path: PathBuf,
    config: Arc<SessionConfig>,
    callback: Option<CompletionCallback>,
    report: Arc<Mutex<Option<SessionReport>>>,
    worker: Worker,
    started: bool,
}

impl RemoteControlSession {
    /// Bind a session to a data path and device name.
    pub fn new(
        config: Arc<SessionConfig>,
        path: impl Into<PathBuf>,
        device: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let path = path.into();
        let device = device.into();
        if device.is_empty() {
            return Err(SessionError::InvalidParam("device name is empty".into()));
        }
        if path.as_os_str().is_empty() {
            return Err(SessionError::InvalidParam(format!(
                "no data path selected for {}",
                device
            )));
        }

        Ok(Self {
            worker: Worker::new(format!("session-{}", device)),
            device,
            path,
            config,
            callback: None,
            report: Arc::new(Mutex::new(None)),
            started: false,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register the completion callback. Replaces any earlier one.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Launch the worker.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        if !self.config.script.path.is_file() {
            return Err(SessionError::ScriptNotFound(self.config.script.path.clone()));
        }

        let config = Arc::clone(&self.config);
        let path = self.path.clone();
        let device = self.device.clone();
        let slot = Arc::clone(&self.report);
        let callback = self.callback.take();

        self.worker.start(move |stop| {
            let _notify = CallbackGuard(callback);
            let report = run(&config, &path, &device, &stop);
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
        })?;

        self.started = true;
        info!(device = %self.device, path = %self.path.display(), "remote control started");
        Ok(())
    }

    /// Stop the session and collect its outcome.
    ///
    /// Blocks until the worker has exited. Safe to call more than once; every
    /// call returns the same outcome. `TestFailed` carries the report with
    /// the recorded error text.
    pub fn stop(&mut self) -> Result<SessionReport, SessionError> {
        self.worker.request_stop();
        self.worker.wait_exit();
        self.worker.join()?;

        let report = self
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match report {
            Some(report) if report.result => Ok(report),
            Some(report) => Err(SessionError::TestFailed {
                reason: report
                    .error
                    .clone()
                    .unwrap_or_else(|| "no result recorded".to_string()),
                report: Box::new(report),
            }),
            None => Err(SessionError::TestFailed {
                reason: "session never ran".to_string(),
                report: Box::default(),
            }),
        }
    }
}

impl Drop for RemoteControlSession {
    fn drop(&mut self) {
        if self.worker.has_thread() {
            if let Err(e) = self.stop() {
                debug!(device = %self.device, error = %e, "session dropped after failed run");
            }
        }
    }
}

/// One pass of the worker body. Never panics on bad input; every failure is
/// recorded in the returned report.
fn run(config: &SessionConfig, path: &Path, device: &str, stop: &StopFlag) -> SessionReport {
    let mut report = SessionReport::default();

    if let Err(e) = launch_and_scan(config, path, device, stop, &mut report) {
        error!(device = %device, error = %e, "remote control failed");
        report.fail(e.to_string());
        return report;
    }

    match check_rules(path, &config.rules) {
        Ok(rules) => {
            debug!(device = %device, matched = rules.matched(), "rules satisfied");
            report.rules = Some(rules);
        }
        Err(e) => {
            warn!(device = %device, error = %e, "rule check failed");
            if let RulesError::CountMismatch { report: rules, .. } = &e {
                report.rules = Some(rules.clone());
            }
            report.fail(format!("failed to check rules: {}", e));
        }
    }

    info!(device = %device, result = report.result, "remote control finished");
    report
}

fn launch_and_scan(
    config: &SessionConfig,
    path: &Path,
    device: &str,
    stop: &StopFlag,
    report: &mut SessionReport,
) -> Result<(), SessionError> {
    let script = &config.script;
    if !script.path.is_file() {
        return Err(SessionError::ScriptNotFound(script.path.clone()));
    }
    if stop.is_requested() {
        return Err(SessionError::Stopped);
    }

    let child = Command::new(&script.path)
        .arg(device)
        .arg(&script.phase)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| SessionError::Launch {
            script: script.path.clone(),
            source,
        })?;

    // Not preemptible: a stop request only takes effect once the script exits.
    let output = child.wait_with_output().map_err(SessionError::Output)?;
    report.exit_code = output.status.code();

    let stdout = String::from_utf8_lossy(&output.stdout);
    report.output_lines = stdout.lines().count();
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        debug!(device = %device, "script stderr: {}", line);
    }

    match marker::scan_tail(&stdout, &script.marker, script.tail_lines) {
        Some(offset) => {
            debug!(device = %device, offset, "marker found");
            report.marker_found = true;
            report.result = true;
        }
        None => {
            report.fail(format!(
                "marker '{}' not found in the last {} lines of output",
                script.marker, script.tail_lines
            ));
        }
    }

    Ok(())
}
