//! Reusable delayed-callback trigger.
//!
//! A [`TimedWait`] owns one worker thread that sleeps on a condition
//! variable until the armed deadline, then invokes the armed callback.
//!
//! Every armed wait ends in exactly one [`WaitOutcome`]:
//! - `Elapsed`: the deadline passed and the callback ran
//! - `Reconfigured`: `arm` was called with a different duration first; the
//!   stale wait is released and its callback dropped
//! - `Cancelled`: `cancel` (or drop) ended the wait; the callback is dropped
//!
//! Re-arming with the same duration keeps the running deadline and swaps
//! in the new callback.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::worker::{Worker, WorkerError};

/// Callback invoked when a wait elapses.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// How an armed wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitOutcome {
    Elapsed,
    Reconfigured,
    Cancelled,
}

/// Timed wait errors.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("wait duration must be positive")]
    ParamInvalid,

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl TimerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TimerError::ParamInvalid => ErrorCode::ParamInvalid,
            TimerError::Worker(e) => e.code(),
        }
    }
}

/// The timed-wait handle: one armed deadline.
///
/// `deadline` is `None` when `duration` runs past what `Instant` can
/// represent; such a wait only ends by reconfigure or cancel.
struct PendingWait {
    duration: Duration,
    deadline: Option<Instant>,
    callback: Option<Callback>,
}

#[derive(Default)]
struct TimerState {
    pending: Option<PendingWait>,
    shutdown: bool,
    last_outcome: Option<WaitOutcome>,
    fired: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delayed callback trigger backed by a dedicated thread.
pub struct TimedWait {
    name: String,
    shared: Arc<Shared>,
    worker: Worker,
}

impl TimedWait {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            worker: Worker::new(format!("timer-{}", name)),
            name,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Arm the wait: `callback` runs once `duration` has elapsed.
    ///
    /// A zero duration is rejected and leaves any pending wait untouched.
    /// A duration too large for the clock arms an unbounded wait.
    pub fn arm<F>(&mut self, duration: Duration, callback: F) -> Result<(), TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if duration.is_zero() {
            warn!(timer = %self.name, "rejecting zero wait duration");
            return Err(TimerError::ParamInvalid);
        }

        // A cancelled timer keeps its thread only until the loop notices;
        // reap it so the next start gets a fresh loop.
        if self.shared.lock().shutdown {
            self.worker.wait_exit();
            self.worker.join()?;
            self.shared.lock().shutdown = false;
        }

        {
            let mut state = self.shared.lock();
            match state.pending.as_mut() {
                Some(pending) if pending.duration == duration => {
                    pending.callback = Some(Box::new(callback));
                }
                _ => {
                    if state.pending.take().is_some() {
                        debug!(timer = %self.name, "pending wait reconfigured");
                        state.last_outcome = Some(WaitOutcome::Reconfigured);
                    }
                    state.pending = Some(PendingWait {
                        duration,
                        deadline: Instant::now().checked_add(duration),
                        callback: Some(Box::new(callback)),
                    });
                }
            }
            self.shared.cond.notify_all();
        }

        if !self.worker.is_running() {
            let shared = Arc::clone(&self.shared);
            let name = self.name.clone();
            self.worker.start(move |_| run_loop(&shared, &name))?;
        }

        Ok(())
    }

    /// Arm with a duration in whole seconds.
    pub fn arm_secs<F>(&mut self, secs: u64, callback: F) -> Result<(), TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.arm(Duration::from_secs(secs), callback)
    }

    /// Cancel any pending wait and stop the worker. Does not block.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        if state.pending.take().is_some() {
            debug!(timer = %self.name, "pending wait cancelled");
            state.last_outcome = Some(WaitOutcome::Cancelled);
        }
        self.shared.cond.notify_all();
        self.worker.request_stop();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    /// Duration of the pending wait, if any.
    pub fn duration(&self) -> Option<Duration> {
        self.shared.lock().pending.as_ref().map(|p| p.duration)
    }

    pub fn last_outcome(&self) -> Option<WaitOutcome> {
        self.shared.lock().last_outcome
    }

    /// Number of callbacks invoked so far.
    pub fn fired(&self) -> u64 {
        self.shared.lock().fired
    }
}

impl Drop for TimedWait {
    fn drop(&mut self) {
        self.cancel();
        self.worker.wait_exit();
    }
}

fn run_loop(shared: &Shared, name: &str) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }

        let Some(deadline) = state.pending.as_ref().and_then(|p| p.deadline) else {
            state = shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = Instant::now();
        if now < deadline {
            debug!(timer = %name, wait_ms = (deadline - now).as_millis() as u64, "waiting");
            state = shared
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let callback = state.pending.take().and_then(|p| p.callback);
        state.last_outcome = Some(WaitOutcome::Elapsed);
        state.fired += 1;
        drop(state);

        debug!(timer = %name, "wait elapsed");
        if let Some(callback) = callback {
            callback();
        }

        state = shared.lock();
    }
    debug!(timer = %name, "timer loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread::sleep;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        (count, move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_once_after_duration() {
        let mut timer = TimedWait::new("once");
        let (tx, rx) = mpsc::channel();
        let armed_at = Instant::now();
        timer
            .arm(Duration::from_millis(50), move || tx.send(Instant::now()).unwrap())
            .unwrap();

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(armed_at) >= Duration::from_millis(50));

        sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());
        assert_eq!(timer.fired(), 1);
        assert_eq!(timer.last_outcome(), Some(WaitOutcome::Elapsed));
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut timer = TimedWait::new("zero");
        let err = timer.arm(Duration::ZERO, || {}).unwrap_err();
        assert!(matches!(err, TimerError::ParamInvalid));
        assert_eq!(err.code(), ErrorCode::ParamInvalid);
        assert!(matches!(timer.arm_secs(0, || {}), Err(TimerError::ParamInvalid)));
    }

    #[test]
    fn test_zero_duration_leaves_pending_wait() {
        let mut timer = TimedWait::new("keep");
        let (count, cb) = counter();
        timer.arm(Duration::from_millis(80), cb).unwrap();

        assert!(timer.arm(Duration::ZERO, || {}).is_err());
        assert_eq!(timer.duration(), Some(Duration::from_millis(80)));

        sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconfigure_cancels_first_callback() {
        let mut timer = TimedWait::new("reconfigure");
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        timer.arm(Duration::from_millis(200), first_cb).unwrap();
        timer.arm(Duration::from_millis(50), second_cb).unwrap();
        assert_eq!(timer.last_outcome(), Some(WaitOutcome::Reconfigured));

        sleep(Duration::from_millis(400));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(timer.fired(), 1);
    }

    #[test]
    fn test_same_duration_replaces_callback_only() {
        let mut timer = TimedWait::new("same");
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        timer.arm(Duration::from_millis(60), first_cb).unwrap();
        timer.arm(Duration::from_millis(60), second_cb).unwrap();

        sleep(Duration::from_millis(300));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_suppresses_callback() {
        let mut timer = TimedWait::new("cancel");
        let (count, cb) = counter();
        timer.arm(Duration::from_millis(100), cb).unwrap();
        timer.cancel();

        sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(timer.last_outcome(), Some(WaitOutcome::Cancelled));
    }

    #[test]
    fn test_rearm_after_cancel() {
        let mut timer = TimedWait::new("rearm");
        timer.arm(Duration::from_millis(100), || {}).unwrap();
        timer.cancel();

        let (count, cb) = counter();
        timer.arm(Duration::from_millis(30), cb).unwrap();
        sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reusable_across_many_waits() {
        let mut timer = TimedWait::new("reuse");
        let (tx, rx) = mpsc::channel();
        for i in 0..3u32 {
            let tx = tx.clone();
            timer
                .arm(Duration::from_millis(20 + u64::from(i)), move || tx.send(i).unwrap())
                .unwrap();
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), i);
        }
        assert_eq!(timer.fired(), 3);
    }

    #[test]
    fn test_unrepresentable_duration_waits_until_reconfigured() {
        let mut timer = TimedWait::new("huge");
        let (first, first_cb) = counter();
        timer.arm(Duration::MAX, first_cb).unwrap();
        assert!(timer.is_pending());
        assert_eq!(timer.duration(), Some(Duration::MAX));

        sleep(Duration::from_millis(100));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(timer.fired(), 0);

        let (second, second_cb) = counter();
        timer.arm(Duration::from_millis(30), second_cb).unwrap();
        sleep(Duration::from_millis(250));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_seconds_armed_and_cancelled() {
        let mut timer = TimedWait::new("max-secs");
        let (count, cb) = counter();
        timer.arm_secs(u64::MAX, cb).unwrap();
        assert!(timer.is_pending());

        timer.cancel();
        sleep(Duration::from_millis(100));
        assert!(!timer.is_pending());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(timer.last_outcome(), Some(WaitOutcome::Cancelled));
    }

    #[test]
    fn test_drop_with_pending_wait_does_not_fire() {
        let (count, cb) = counter();
        {
            let mut timer = TimedWait::new("drop");
            timer.arm(Duration::from_millis(100), cb).unwrap();
        }
        sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
