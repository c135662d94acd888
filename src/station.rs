//! Station registry: one [`DeviceJob`] per attached device.
//!
//! Device hot-plug and path selection arrive from the outside world; the
//! station turns them into job lifecycle calls.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

use crate::algorithm::AlgorithmFactory;
use crate::config::StationConfig;
use crate::error::ErrorCode;
use crate::job::{DeviceJob, JobError, JobStatus};
use crate::status::StatusSink;

#[derive(Debug, Error)]
pub enum StationError {
    #[error("device {0} is already attached")]
    AlreadyAttached(String),

    #[error("device {0} is not attached")]
    UnknownDevice(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl StationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StationError::AlreadyAttached(_) => ErrorCode::AlreadyRunning,
            StationError::UnknownDevice(_) => ErrorCode::NotFound,
            StationError::Job(e) => e.code(),
        }
    }
}

pub struct Station {
    config: StationConfig,
    sink: Arc<dyn StatusSink>,
    factory: Arc<dyn AlgorithmFactory>,
    path: Mutex<PathBuf>,
    jobs: Mutex<BTreeMap<String, DeviceJob>>,
}

impl Station {
    pub fn new(
        config: StationConfig,
        sink: Arc<dyn StatusSink>,
        factory: Arc<dyn AlgorithmFactory>,
    ) -> Self {
        Self {
            config,
            sink,
            factory,
            path: Mutex::new(PathBuf::new()),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, BTreeMap<String, DeviceJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A device was plugged in: create its job with the current data path
    /// and start a run.
    pub fn attach(&self, name: &str) -> Result<(), StationError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(name) {
            return Err(StationError::AlreadyAttached(name.to_string()));
        }

        let mut job = DeviceJob::new(
            name,
            &self.config,
            Arc::clone(&self.sink),
            Arc::clone(&self.factory),
        )?;
        job.set_path(self.path());
        job.start()?;

        info!(device = %name, "device attached");
        jobs.insert(name.to_string(), job);
        Ok(())
    }

    /// A device was removed: stop its job and drop it.
    pub fn detach(&self, name: &str) -> Result<JobStatus, StationError> {
        let job = self.jobs().remove(name);
        let mut job = job.ok_or_else(|| StationError::UnknownDevice(name.to_string()))?;

        let status = job.stop()?;
        info!(device = %name, state = ?status.state, "device detached");
        Ok(status)
    }

    /// A new data path was selected: every job uses it from its next run.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        for job in self.jobs().values() {
            job.set_path(path.clone());
        }
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn path(&self) -> PathBuf {
        self.path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of attached devices, sorted.
    pub fn devices(&self) -> Vec<String> {
        self.jobs().keys().cloned().collect()
    }

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        self.jobs().get(name).map(DeviceJob::status)
    }

    /// Block until the device's current run finishes.
    pub fn wait(&self, name: &str) -> Result<JobStatus, StationError> {
        let exit = self
            .jobs()
            .get(name)
            .map(DeviceJob::exit_signal)
            .ok_or_else(|| StationError::UnknownDevice(name.to_string()))?;
        exit.wait();
        self.status(name)
            .ok_or_else(|| StationError::UnknownDevice(name.to_string()))
    }

    /// Raise the stop flag of every job without waiting.
    pub fn request_stop_all(&self) {
        for job in self.jobs().values() {
            job.request_stop();
        }
    }

    /// Stop and drop every job.
    pub fn detach_all(&self) -> Vec<(String, Result<JobStatus, JobError>)> {
        let jobs = std::mem::take(&mut *self.jobs());
        jobs.into_iter()
            .map(|(name, mut job)| {
                let result = job.stop();
                if let Err(e) = &result {
                    warn!(device = %name, error = %e, "device job ended abnormally");
                }
                (name, result)
            })
            .collect()
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.request_stop_all();
        self.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AcceptAll;
    use crate::status::{MemorySink, Stage};

    fn station(sink: Arc<MemorySink>) -> Station {
        Station::new(StationConfig::default(), sink, Arc::new(AcceptAll))
    }

    #[test]
    fn test_attach_twice_rejected() {
        let station = station(Arc::new(MemorySink::new()));
        station.attach("dut-1").unwrap();
        let err = station.attach("dut-1").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyRunning);
        assert_eq!(station.devices(), vec!["dut-1".to_string()]);
    }

    #[test]
    fn test_detach_unknown() {
        let station = station(Arc::new(MemorySink::new()));
        let err = station.detach("ghost").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_attach_wait_detach() {
        let sink = Arc::new(MemorySink::new());
        let station = station(Arc::clone(&sink));
        station.attach("dut-2").unwrap();
        station.attach("dut-1").unwrap();
        assert_eq!(station.devices(), vec!["dut-1", "dut-2"]);

        station.wait("dut-1").unwrap();
        station.wait("dut-2").unwrap();
        // No path selected: both runs fail at session construction.
        assert_eq!(sink.count(Stage::FinalResult), 2);

        station.detach("dut-1").unwrap();
        assert_eq!(station.devices(), vec!["dut-2"]);
    }

    #[test]
    fn test_set_path_broadcast() {
        let station = station(Arc::new(MemorySink::new()));
        station.attach("dut-1").unwrap();
        station.wait("dut-1").unwrap();
        station.set_path("/data/new");

        assert_eq!(station.path(), PathBuf::from("/data/new"));
        let jobs = station.jobs();
        assert_eq!(jobs["dut-1"].path(), PathBuf::from("/data/new"));
    }

    #[test]
    fn test_attach_uses_selected_path() {
        let station = station(Arc::new(MemorySink::new()));
        station.set_path("/data/current");
        station.attach("dut-3").unwrap();
        let jobs = station.jobs();
        assert_eq!(jobs["dut-3"].path(), PathBuf::from("/data/current"));
    }
}
