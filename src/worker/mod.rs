//! Dedicated worker threads with a one-shot exit rendezvous.
//!
//! Every long-lived station component (device job, remote-control session,
//! timed wait) owns exactly one OS thread. [`Worker`] wraps that thread:
//! `start` spawns it, `request_stop` raises a cooperative stop flag, and
//! `join` reaps it. The body never signals completion itself; an exit guard
//! fires the [`Completion`] exactly once when the body returns or unwinds.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorCode;

/// Worker lifecycle errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0} is already running")]
    AlreadyRunning(String),

    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("worker {0} panicked")]
    Panicked(String),
}

impl WorkerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkerError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            WorkerError::Spawn { .. } => ErrorCode::OutOfMemory,
            WorkerError::Panicked(_) => ErrorCode::Propagated,
        }
    }
}

/// One-shot rendezvous signal.
///
/// Any number of threads may wait; the first `signal` releases all of them
/// and later calls are no-ops. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

#[derive(Debug, Default)]
struct CompletionInner {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns true only for the call that fired it.
    pub fn signal(&self) -> bool {
        let mut done = self.inner.done.lock().unwrap_or_else(PoisonError::into_inner);
        if *done {
            return false;
        }
        *done = true;
        self.inner.cond.notify_all();
        true
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until signaled.
    pub fn wait(&self) {
        let mut done = self.inner.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .inner
                .cond
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until signaled or `timeout` passes. Returns true if signaled.
    ///
    /// A timeout past the clock's range waits without a deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut done = self.inner.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = self
                .inner
                .cond
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Cooperative stop request shared between a worker and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fires the exit completion when the worker body ends, even by unwinding.
struct ExitGuard(Completion);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.signal();
    }
}

/// A named, restartable worker thread.
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop: StopFlag,
    exit: Completion,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop: StopFlag::new(),
            exit: Completion::new(),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True between a successful `start` and the body returning.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.exit.is_signaled()
    }

    /// Whether the thread was ever started since the last `join`.
    pub fn has_thread(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the worker thread running `body`.
    ///
    /// A previous, already finished thread is reaped first; the stop flag
    /// and exit completion are fresh for every start.
    pub fn start<F>(&mut self, body: F) -> Result<(), WorkerError>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning(self.name.clone()));
        }
        if self.handle.is_some() {
            if let Err(e) = self.join() {
                warn!(worker = %self.name, error = %e, "previous run ended abnormally");
            }
        }

        self.stop = StopFlag::new();
        self.exit = Completion::new();

        let stop = self.stop.clone();
        let guard = ExitGuard(self.exit.clone());
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _guard = guard;
                body(stop);
            })
            .map_err(|source| WorkerError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        debug!(worker = %self.name, "worker started");
        self.handle = Some(handle);
        Ok(())
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// The exit completion of the current (or last) run.
    pub fn exit_signal(&self) -> Completion {
        self.exit.clone()
    }

    /// Block until the body has returned. Returns immediately if never started.
    pub fn wait_exit(&self) {
        if self.handle.is_some() {
            self.exit.wait();
        }
    }

    /// Reap the thread, surfacing a panic in the body.
    pub fn join(&mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => {
                let result = handle
                    .join()
                    .map_err(|_| WorkerError::Panicked(self.name.clone()));
                debug!(worker = %self.name, "worker joined");
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.request_stop();
        if let Err(e) = self.join() {
            warn!(worker = %self.name, error = %e, "worker ended abnormally");
        }
    }
}
