//! Scheduled execution used by background tasks.
//!
//! Background tasks never own threads of their own: the caller hands them a
//! [`Scheduler`], typically shared across many tasks.

mod thread;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;

use thiserror::Error;

pub use thread::ThreadScheduler;

/// What a scheduled job wants after an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Run again after the configured delay.
    Continue,
    /// Done; drop the job.
    Stop,
}

/// Unit of work handed to a scheduler.
pub type Job = Box<dyn FnMut() -> Repeat + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler `{0}` is shut down")]
    Shutdown(String),

    #[error("failed to start scheduler worker: {0}")]
    Spawn(String),
}

/// Facility that runs a job after an initial delay, then repeatedly with a
/// fixed delay between the end of one execution and the start of the next.
pub trait Scheduler: fmt::Debug + Send + Sync {
    fn schedule_with_fixed_delay(
        &self,
        name: &str,
        initial_delay: Duration,
        delay: Duration,
        job: Job,
    ) -> Result<ScheduledHandle, SchedulerError>;
}

/// Cancellation state of one scheduled job, shared between the scheduler
/// executing it and the [`ScheduledHandle`] given to the caller.
///
/// Schedulers call [`JobControl::enter`] before each execution and
/// [`JobControl::exit`] after it, panics included.
#[derive(Debug, Default)]
pub struct JobControl {
    state: Mutex<ControlState>,
    idle: Condvar,
}

#[derive(Debug, Default)]
struct ControlState {
    cancelled: bool,
    running_on: Option<ThreadId>,
}

impl JobControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark an execution as started. Returns `false` once cancelled; the job
    /// must then be dropped without running.
    pub fn enter(&self) -> bool {
        let mut state = self.lock();
        if state.cancelled {
            return false;
        }
        state.running_on = Some(std::thread::current().id());
        true
    }

    pub fn exit(&self) {
        self.lock().running_on = None;
        self.idle.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Mark cancelled and wait for an in-flight execution to end. A job that
    /// cancels itself does not wait on itself.
    fn cancel(&self) {
        let me = std::thread::current().id();
        let mut state = self.lock();
        state.cancelled = true;
        while state.running_on.is_some_and(|id| id != me) {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type PurgeHook = Box<dyn Fn() + Send + Sync>;

/// Caller's side of a scheduled job.
///
/// Dropping the handle does not cancel the job.
pub struct ScheduledHandle {
    name: String,
    control: Arc<JobControl>,
    purge: Option<PurgeHook>,
}

impl ScheduledHandle {
    pub fn new(name: impl Into<String>, control: Arc<JobControl>) -> Self {
        Self {
            name: name.into(),
            control,
            purge: None,
        }
    }

    /// Hook run after cancellation so the scheduler can release the job
    /// eagerly instead of at its next deadline.
    pub fn with_purge(mut self, purge: impl Fn() + Send + Sync + 'static) -> Self {
        self.purge = Some(Box::new(purge));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop further executions. When this returns no execution of the job is
    /// in progress (unless called from within the job itself) and none will
    /// start. Idempotent.
    pub fn cancel(&self) {
        self.control.cancel();
        if let Some(purge) = &self.purge {
            purge();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

impl fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn cancelled_control_refuses_entry() {
        let control = JobControl::new();
        let handle = ScheduledHandle::new("job", control.clone());

        assert!(control.enter());
        control.exit();

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(!control.enter());
    }

    #[test]
    fn cancel_waits_for_running_execution() {
        let control = JobControl::new();
        let handle = ScheduledHandle::new("job", control.clone());
        let finished = Arc::new(AtomicBool::new(false));

        assert!(control.enter());
        let worker = {
            let control = control.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                // The entering thread is this test thread; hand over ownership
                // of the execution to the worker.
                thread::sleep(Duration::from_millis(30));
                finished.store(true, Ordering::SeqCst);
                control.exit();
            })
        };

        // Cancel from a different thread than the one that entered.
        let started = Instant::now();
        let canceller = thread::spawn(move || {
            handle.cancel();
        });
        canceller.join().unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert!(started.elapsed() >= Duration::from_millis(20));
        worker.join().unwrap();
    }

    #[test]
    fn self_cancel_does_not_deadlock() {
        let control = JobControl::new();
        let handle = ScheduledHandle::new("job", control.clone());

        assert!(control.enter());
        handle.cancel();
        control.exit();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn purge_hook_runs_on_cancel() {
        let purged = Arc::new(AtomicBool::new(false));
        let flag = purged.clone();
        let handle = ScheduledHandle::new("job", JobControl::new())
            .with_purge(move || flag.store(true, Ordering::SeqCst));

        handle.cancel();
        assert!(purged.load(Ordering::SeqCst));
    }
}
