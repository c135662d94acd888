//! Per-device job
//!
//! A [`DeviceJob`] owns one worker thread that runs the station pipeline for
//! a single attached device:
//!
//! 1. report `ATTACHED`
//! 2. run a [`RemoteControlSession`] and wait for its completion callback
//! 3. report `REMOTE_CONTROLLED`
//! 4. create, init and run the verification algorithm
//! 5. report `PROCESS_RESULT`, deinit, report `DEINITIALIZED`
//! 6. report `FINAL_RESULT`
//!
//! Any failing stage skips the rest of the pipeline except the final report,
//! which is sent exactly once per run.

pub mod state;

pub use state::{JobState, JobStateError, JobStatus};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::algorithm::{AlgorithmError, AlgorithmFactory};
use crate::config::StationConfig;
use crate::error::ErrorCode;
use crate::remote::{RemoteControlSession, SessionConfig, SessionError};
use crate::status::{Stage, StatusError, StatusSink};
use crate::worker::{Completion, StopFlag, Worker, WorkerError};

/// Device job errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job parameter: {0}")]
    InvalidParam(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The session for a run could not be constructed. Reported as
    /// `OUT_OF_MEMORY` whatever the underlying cause.
    #[error("cannot create remote control session: {0}")]
    SessionCreate(#[source] SessionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),

    #[error(transparent)]
    State(#[from] JobStateError),

    #[error("stop requested before {0}")]
    Aborted(&'static str),
}

impl JobError {
    pub fn code(&self) -> ErrorCode {
        match self {
            JobError::InvalidParam(_) => ErrorCode::ParamInvalid,
            JobError::Worker(e) => e.code(),
            JobError::SessionCreate(_) => ErrorCode::OutOfMemory,
            JobError::Session(e) => e.code(),
            JobError::Status(e) => e.code(),
            JobError::Algorithm(e) => e.code(),
            JobError::State(_) => ErrorCode::Propagated,
            JobError::Aborted(_) => ErrorCode::TestFailed,
        }
    }
}

/// State shared between the job handle and its worker thread.
struct JobShared {
    name: String,
    session_config: Arc<SessionConfig>,
    sink: Arc<dyn StatusSink>,
    factory: Arc<dyn AlgorithmFactory>,
    path: Mutex<PathBuf>,
    status: Mutex<JobStatus>,
}

impl JobShared {
    fn status(&self) -> MutexGuard<'_, JobStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn path(&self) -> PathBuf {
        self.path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enter(&self, state: JobState) -> Result<(), JobError> {
        self.status().transition(state)?;
        Ok(())
    }
}

/// Pipeline runner for one attached device.
pub struct DeviceJob {
    shared: Arc<JobShared>,
    worker: Worker,
}

impl DeviceJob {
    pub fn new(
        name: impl Into<String>,
        config: &StationConfig,
        sink: Arc<dyn StatusSink>,
        factory: Arc<dyn AlgorithmFactory>,
    ) -> Result<Self, JobError> {
        let name = name.into();
        if name.is_empty() {
            return Err(JobError::InvalidParam("device name is empty".into()));
        }

        Ok(Self {
            worker: Worker::new(format!("job-{}", name)),
            shared: Arc::new(JobShared {
                name,
                session_config: Arc::new(SessionConfig::from(config)),
                sink,
                factory,
                path: Mutex::new(PathBuf::new()),
                status: Mutex::new(JobStatus::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Set the data path for the next run. A run in progress keeps the path
    /// it started with.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!(device = %self.shared.name, path = %path.display(), "data path selected");
        *self.shared.path.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn path(&self) -> PathBuf {
        self.shared.path()
    }

    pub fn state(&self) -> JobState {
        self.shared.status().state
    }

    pub fn status(&self) -> JobStatus {
        self.shared.status().clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Launch a pipeline run on the job's worker thread.
    pub fn start(&mut self) -> Result<(), JobError> {
        let shared = Arc::clone(&self.shared);
        self.worker.start(move |stop| run(&shared, &stop))?;
        Ok(())
    }

    /// Signal raised when the current run's worker exits.
    pub fn exit_signal(&self) -> Completion {
        self.worker.exit_signal()
    }

    /// Block until the current run finishes and return the job status.
    pub fn wait(&self) -> JobStatus {
        self.worker.wait_exit();
        self.status()
    }

    /// Raise the stop flag without waiting.
    pub fn request_stop(&self) {
        self.worker.request_stop();
    }

    /// Request a graceful stop and wait for the worker to exit.
    ///
    /// The stage in progress completes; the pipeline aborts at the next
    /// stage boundary and still reports `FINAL_RESULT`.
    pub fn stop(&mut self) -> Result<JobStatus, JobError> {
        self.worker.request_stop();
        self.worker.wait_exit();
        self.worker.join()?;
        Ok(self.status())
    }
}

impl Drop for DeviceJob {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(device = %self.shared.name, error = %e, "device job ended abnormally");
        }
    }
}

/// Worker body: one full pipeline run.
fn run(shared: &JobShared, stop: &StopFlag) {
    let name = shared.name.as_str();
    let path = shared.path();

    let begun = shared.status().begin_run();
    let run_id = match begun {
        Ok(run_id) => run_id,
        Err(e) => {
            error!(device = %name, error = %e, "cannot begin run");
            report_final(shared, false);
            return;
        }
    };

    let span = info_span!("device_run", device = %name, %run_id);
    let _enter = span.enter();
    info!(path = %path.display(), "run started");

    let outcome = pipeline(shared, &path, stop);
    let (state, result) = match &outcome {
        Ok(true) => (JobState::Succeeded, true),
        Ok(false) => (JobState::Failed, false),
        Err(JobError::Aborted(_)) => (JobState::Aborted, false),
        Err(_) => (JobState::Failed, false),
    };
    if let Err(e) = &outcome {
        error!(code = %e.code(), error = %e, "run failed");
    }

    report_final(shared, result);

    let finished = shared.status().finish(state, result);
    if let Err(e) = finished {
        warn!(error = %e, "could not record final state");
    }
    info!(?state, result, "run finished");
}

fn report_final(shared: &JobShared, result: bool) {
    if let Err(e) = shared.sink.report(&shared.name, Stage::FinalResult, result) {
        error!(device = %shared.name, error = %e, "failed to report final result");
    }
}

fn checkpoint(stop: &StopFlag, next: &'static str) -> Result<(), JobError> {
    if stop.is_requested() {
        warn!("stop requested, skipping {}", next);
        return Err(JobError::Aborted(next));
    }
    Ok(())
}

/// Stages before the final report. Returns the algorithm's verdict.
fn pipeline(shared: &JobShared, path: &Path, stop: &StopFlag) -> Result<bool, JobError> {
    let name = shared.name.as_str();

    shared.sink.report(name, Stage::Attached, true)?;
    checkpoint(stop, "remote control")?;

    remote_control(shared, path)?;
    shared.sink.report(name, Stage::RemoteControlled, true)?;
    checkpoint(stop, "verification")?;

    shared.enter(JobState::Verifying)?;
    let mut algorithm = shared.factory.create(path, name)?;
    algorithm.init()?;

    let result = algorithm.process();
    if !result {
        warn!("verification did not pass");
    }
    shared.sink.report(name, Stage::ProcessResult, result)?;
    algorithm.deinit()?;
    drop(algorithm);
    checkpoint(stop, "deinitialized report")?;

    shared.sink.report(name, Stage::Deinitialized, result)?;
    Ok(result)
}

/// Run one remote-control session to completion.
fn remote_control(shared: &JobShared, path: &Path) -> Result<(), JobError> {
    let mut session =
        RemoteControlSession::new(Arc::clone(&shared.session_config), path, &shared.name)
            .map_err(JobError::SessionCreate)?;

    let done = Completion::new();
    let notify = done.clone();
    session.set_callback(move || {
        notify.signal();
    });
    session.start()?;

    done.wait();
    let report = session.stop()?;
    info!(exit_code = ?report.exit_code, "remote control succeeded");
    Ok(())
}
