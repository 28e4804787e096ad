//! Background task: iterations are paced by a [`Scheduler`], the caller only
//! waits for the terminal state.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use tracing::{debug, warn};

use cadence_core::{Budget, IterationBudget, TaskError, TaskId, TaskResult};

use crate::interrupt::Interrupter;
use crate::registry::TaskRegistry;
use crate::scheduler::{Job, Repeat, Scheduler, ThreadScheduler};
use crate::task::{Task, TaskCore, TaskState, TaskStatus};

/// Builder for [`BackgroundTask`].
#[derive(Debug)]
pub struct BackgroundTaskBuilder {
    name: String,
    budget: Option<Arc<dyn Budget>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    registry: Option<Arc<TaskRegistry>>,
}

impl Default for BackgroundTaskBuilder {
    fn default() -> Self {
        Self {
            name: "background-task".to_string(),
            budget: None,
            scheduler: None,
            registry: None,
        }
    }
}

impl BackgroundTaskBuilder {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_budget(mut self, budget: impl Budget + 'static) -> Self {
        self.budget = Some(Arc::new(budget));
        self
    }

    pub fn with_shared_budget(mut self, budget: Arc<dyn Budget>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Scheduler that will execute the iterations. Without one, each run
    /// starts (and stops) a private single-thread scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> BackgroundTask {
        let budget = self
            .budget
            .unwrap_or_else(|| Arc::new(IterationBudget::default()));
        BackgroundTask {
            core: TaskCore::new(self.name, budget, self.registry),
            scheduler: self.scheduler,
        }
    }
}

/// How a background run ended, as reported from the scheduler thread.
enum Outcome<E> {
    Completed,
    Exhausted,
    Interrupted,
    Failed(E),
    Panicked(Box<dyn Any + Send>),
}

/// Repeats an operation on a scheduler thread until it reports success or
/// the budget runs out, while the caller blocks on the result.
///
/// Only one iteration executes at a time. The counters are written by the
/// scheduler thread during the run and read by the caller once it returns.
#[derive(Debug)]
pub struct BackgroundTask {
    core: TaskCore,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl BackgroundTask {
    /// Handle for stopping the task from another thread.
    pub fn interrupter(&self) -> Interrupter {
        self.core.interrupter().clone()
    }

    /// Run `op` until it returns `true` (`Ok(true)`) or the budget is
    /// exhausted (`Ok(false)`).
    pub fn run<F>(&mut self, mut op: F) -> TaskResult<bool>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.try_run(move || Ok::<_, TaskError>(op()))
    }

    /// Like [`BackgroundTask::run`], handing the same `payload` to every
    /// invocation of `predicate`. Keep a clone of the `Arc` to inspect the
    /// payload afterwards.
    pub fn run_with<T, P>(&mut self, mut predicate: P, payload: Arc<T>) -> TaskResult<bool>
    where
        T: Send + Sync + 'static,
        P: FnMut(&T) -> bool + Send + 'static,
    {
        self.run(move || predicate(&payload))
    }

    /// Fallible variant of [`BackgroundTask::run`]. The first error returned
    /// by `op` stops the task and is handed back unchanged. A panic in `op` is
    /// resumed on the calling thread.
    pub fn try_run<E, F>(&mut self, mut op: F) -> Result<bool, E>
    where
        F: FnMut() -> Result<bool, E> + Send + 'static,
        E: From<TaskError> + Send + 'static,
    {
        let core = &self.core;
        let run = core.begin()?;
        let budget = core.budget().clone();

        if !core.shared().progress().can_continue(budget.as_ref()) {
            run.finish(TaskState::Exhausted);
            return Ok(false);
        }
        if core.interrupter().is_interrupted() {
            run.finish(TaskState::Interrupted);
            return Ok(false);
        }

        let owned;
        let scheduler: &dyn Scheduler = match &self.scheduler {
            Some(scheduler) => scheduler.as_ref(),
            None => {
                owned = ThreadScheduler::new(format!("{}-scheduler", core.name()))
                    .map_err(|err| TaskError::rejected(core.name(), err.to_string()))?;
                &owned
            }
        };

        let (tx, rx) = mpsc::channel::<Outcome<E>>();
        let tx = Arc::new(tx);

        // Weak, so that a scheduler dropping the job disconnects the channel.
        let _listener = {
            let tx = Arc::downgrade(&tx);
            core.interrupter().on_interrupt(move || {
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(Outcome::Interrupted);
                }
            })
        };

        let job: Job = {
            let shared = core.shared().clone();
            let budget = budget.clone();
            Box::new(move || {
                let iteration = {
                    let mut progress = shared.progress();
                    progress
                        .try_advance(budget.as_ref())
                        .then(|| progress.iteration())
                };
                let Some(iteration) = iteration else {
                    let _ = tx.send(Outcome::Exhausted);
                    return Repeat::Stop;
                };

                debug!(task = %shared.name(), iteration, "running iteration");
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| op())) {
                    Ok(Ok(true)) => Outcome::Completed,
                    Ok(Ok(false)) => {
                        if shared.progress().can_continue(budget.as_ref()) {
                            return Repeat::Continue;
                        }
                        Outcome::Exhausted
                    }
                    Ok(Err(err)) => Outcome::Failed(err),
                    Err(payload) => {
                        warn!(task = %shared.name(), iteration, "operation panicked");
                        Outcome::Panicked(payload)
                    }
                };
                let _ = tx.send(outcome);
                Repeat::Stop
            })
        };

        let handle = scheduler
            .schedule_with_fixed_delay(core.name(), budget.initial_delay(), budget.interval(), job)
            .map_err(|err| {
                warn!(task = %core.name(), error = %err, "scheduler rejected task");
                TaskError::rejected(core.name(), err.to_string())
            })?;

        let mut outcome = rx.recv();
        handle.cancel();
        // An iteration in flight when the interrupt arrived has settled by
        // now; its result wins, as it would in the foreground.
        if matches!(outcome, Ok(Outcome::Interrupted)) {
            if let Ok(settled) = rx.try_recv() {
                outcome = Ok(settled);
            }
        }

        match outcome {
            Ok(Outcome::Completed) => {
                run.finish(TaskState::Completed);
                Ok(true)
            }
            Ok(Outcome::Exhausted) => {
                run.finish(TaskState::Exhausted);
                Ok(false)
            }
            Ok(Outcome::Interrupted) => {
                run.finish(TaskState::Interrupted);
                Ok(false)
            }
            Ok(Outcome::Failed(err)) => {
                run.finish(TaskState::Failed);
                Err(err)
            }
            Ok(Outcome::Panicked(payload)) => {
                run.finish(TaskState::Failed);
                panic::resume_unwind(payload)
            }
            Err(mpsc::RecvError) => {
                warn!(task = %core.name(), "scheduler dropped task before it finished");
                run.finish(TaskState::Failed);
                Err(TaskError::scheduler_stopped(core.name()).into())
            }
        }
    }
}

impl Task for BackgroundTask {
    fn id(&self) -> TaskId {
        self.core.shared().id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn iteration(&self) -> u64 {
        self.core.iteration()
    }

    fn elapsed(&self) -> Duration {
        self.core.elapsed()
    }

    fn status(&self) -> TaskStatus {
        self.core.shared().status()
    }
}
