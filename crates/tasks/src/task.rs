//! Task state shared by the foreground and background drivers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cadence_core::{Budget, TaskError, TaskId, TaskResult};

use crate::interrupt::Interrupter;
use crate::registry::TaskRegistry;

/// Lifecycle of a task.
///
/// ```text
/// NotStarted --run--> Iterating --operation true--> Completed
///                         |------budget denied----> Exhausted
///                         |------interrupted------> Interrupted
///                         +------error/panic------> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    NotStarted,
    Iterating,
    /// The operation signalled success.
    Completed,
    /// The budget denied another iteration.
    Exhausted,
    /// Stopped early through an [`Interrupter`].
    Interrupted,
    /// The operation returned an error or panicked.
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Exhausted | TaskState::Interrupted | TaskState::Failed
        )
    }
}

/// Point-in-time view of a task, e.g. for listing in-flight tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub iteration: u64,
    pub elapsed_ms: u64,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Introspection common to all task drivers.
pub trait Task {
    fn id(&self) -> TaskId;

    fn name(&self) -> &str;

    fn state(&self) -> TaskState;

    /// Number of times the operation has been invoked.
    fn iteration(&self) -> u64;

    /// Time from the first iteration to the terminal state (or to now, while
    /// still iterating).
    fn elapsed(&self) -> Duration;

    fn status(&self) -> TaskStatus;
}

/// Counters and clocks of one run.
#[derive(Debug)]
pub(crate) struct Progress {
    state: TaskState,
    iteration: u64,
    started: Option<Instant>,
    finished: Option<Instant>,
    first_attempt_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: TaskState::NotStarted,
            iteration: 0,
            started: None,
            finished: None,
            first_attempt_at: None,
            last_attempt_at: None,
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(started), Some(finished)) => finished.saturating_duration_since(started),
            (Some(started), None) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Whether the budget admits another iteration.
    pub(crate) fn can_continue(&self, budget: &dyn Budget) -> bool {
        budget.has_next(self.iteration, self.elapsed())
    }

    /// Claim the next iteration. The clock starts with the first one.
    pub(crate) fn try_advance(&mut self, budget: &dyn Budget) -> bool {
        if !self.can_continue(budget) {
            return false;
        }

        let now = Utc::now();
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.first_attempt_at = Some(now);
        }
        self.iteration += 1;
        self.last_attempt_at = Some(now);
        true
    }

    fn finish(&mut self, state: TaskState) {
        self.state = state;
        if self.started.is_some() {
            self.finished = Some(Instant::now());
        }
    }
}

/// Identity and progress of a task, shared with the registry and with
/// scheduler jobs.
#[derive(Debug)]
pub(crate) struct Shared {
    id: TaskId,
    name: String,
    progress: Mutex<Progress>,
}

impl Shared {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Operations never run while the lock is held, so a poisoned lock still
    /// guards consistent counters.
    pub(crate) fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> TaskStatus {
        let progress = self.progress();
        TaskStatus {
            id: self.id,
            name: self.name.clone(),
            state: progress.state,
            iteration: progress.iteration,
            elapsed_ms: progress.elapsed().as_millis() as u64,
            first_attempt_at: progress.first_attempt_at,
            last_attempt_at: progress.last_attempt_at,
        }
    }
}

/// Everything a driver needs besides the operation itself.
#[derive(Debug)]
pub(crate) struct TaskCore {
    shared: Arc<Shared>,
    budget: Arc<dyn Budget>,
    interrupter: Interrupter,
    registry: Option<Arc<TaskRegistry>>,
}

impl TaskCore {
    pub(crate) fn new(
        name: String,
        budget: Arc<dyn Budget>,
        registry: Option<Arc<TaskRegistry>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: TaskId::new(),
                name,
                progress: Mutex::new(Progress::new()),
            }),
            budget,
            interrupter: Interrupter::new(),
            registry,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn budget(&self) -> &Arc<dyn Budget> {
        &self.budget
    }

    pub(crate) fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }

    pub(crate) fn name(&self) -> &str {
        self.shared.name()
    }

    /// Move from `NotStarted` to `Iterating`. Tasks are single-use.
    ///
    /// The returned guard marks the task `Failed` if dropped before
    /// [`RunGuard::finish`], e.g. while a panicking operation unwinds.
    pub(crate) fn begin(&self) -> TaskResult<RunGuard<'_>> {
        {
            let mut progress = self.shared.progress();
            if progress.state != TaskState::NotStarted {
                return Err(TaskError::already_run(self.name()));
            }
            progress.state = TaskState::Iterating;
        }

        if let Some(registry) = &self.registry {
            registry.register(self.shared.clone());
        }
        debug!(task = %self.name(), id = %self.shared.id(), budget = ?self.budget, "task started");
        Ok(RunGuard {
            core: self,
            finished: false,
        })
    }

    fn finish(&self, state: TaskState) {
        let (iteration, elapsed) = {
            let mut progress = self.shared.progress();
            progress.finish(state);
            (progress.iteration, progress.elapsed())
        };

        if let Some(registry) = &self.registry {
            registry.remove(self.shared.id());
        }
        debug!(
            task = %self.name(),
            state = ?state,
            iteration,
            elapsed_ms = elapsed.as_millis() as u64,
            "task finished"
        );
    }

    pub(crate) fn state(&self) -> TaskState {
        self.shared.progress().state()
    }

    pub(crate) fn iteration(&self) -> u64 {
        self.shared.progress().iteration()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.shared.progress().elapsed()
    }
}

/// One run of a task, from `begin` to its terminal state.
pub(crate) struct RunGuard<'a> {
    core: &'a TaskCore,
    finished: bool,
}

impl RunGuard<'_> {
    pub(crate) fn finish(mut self, state: TaskState) {
        self.finished = true;
        self.core.finish(state);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.core.finish(TaskState::Failed);
        }
    }
}
