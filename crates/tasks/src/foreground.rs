//! Foreground task: every iteration, and every wait between iterations,
//! happens on the calling thread.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use cadence_core::{Budget, IterationBudget, TaskError, TaskId, TaskResult};

use crate::interrupt::Interrupter;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskCore, TaskState, TaskStatus};

/// Builder for [`ForegroundTask`].
#[derive(Debug)]
pub struct ForegroundTaskBuilder {
    name: String,
    budget: Option<Arc<dyn Budget>>,
    registry: Option<Arc<TaskRegistry>>,
}

impl Default for ForegroundTaskBuilder {
    fn default() -> Self {
        Self {
            name: "foreground-task".to_string(),
            budget: None,
            registry: None,
        }
    }
}

impl ForegroundTaskBuilder {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_budget(mut self, budget: impl Budget + 'static) -> Self {
        self.budget = Some(Arc::new(budget));
        self
    }

    /// Use an already shared budget, e.g. one built from `BudgetConfig`.
    pub fn with_shared_budget(mut self, budget: Arc<dyn Budget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Without an explicit budget the task gets [`IterationBudget::default`].
    pub fn build(self) -> ForegroundTask {
        let budget = self
            .budget
            .unwrap_or_else(|| Arc::new(IterationBudget::default()));
        ForegroundTask {
            core: TaskCore::new(self.name, budget, self.registry),
        }
    }
}

/// Repeats an operation on the calling thread until it reports success or
/// the budget runs out.
///
/// The caller is blocked for the whole run, sleeps included. The budget is
/// only consulted between iterations: an operation that blocks keeps the
/// task running past its duration bound.
#[derive(Debug)]
pub struct ForegroundTask {
    core: TaskCore,
}

impl ForegroundTask {
    /// Handle for stopping the task from another thread.
    pub fn interrupter(&self) -> Interrupter {
        self.core.interrupter().clone()
    }

    /// Run `op` until it returns `true` (`Ok(true)`) or the budget is
    /// exhausted (`Ok(false)`).
    pub fn run<F>(&mut self, mut op: F) -> TaskResult<bool>
    where
        F: FnMut() -> bool,
    {
        self.try_run(|| Ok::<_, TaskError>(op()))
    }

    /// Like [`ForegroundTask::run`], handing the same `payload` to every
    /// invocation of `predicate`.
    pub fn run_with<T, P>(&mut self, mut predicate: P, payload: &T) -> TaskResult<bool>
    where
        T: ?Sized,
        P: FnMut(&T) -> bool,
    {
        self.run(|| predicate(payload))
    }

    /// Poll `supplier` until it yields a value. `Ok(None)` when the budget
    /// ran out (or the task was interrupted) first.
    pub fn result<R, F>(&mut self, mut supplier: F) -> TaskResult<Option<R>>
    where
        F: FnMut() -> Option<R>,
    {
        let mut value = None;
        self.run(|| {
            value = supplier();
            value.is_some()
        })?;
        Ok(value)
    }

    /// Fallible variant of [`ForegroundTask::run`]. The first error returned by
    /// `op` stops the task and is handed back unchanged.
    pub fn try_run<E, F>(&mut self, mut op: F) -> Result<bool, E>
    where
        F: FnMut() -> Result<bool, E>,
        E: From<TaskError>,
    {
        let core = &self.core;
        let run = core.begin()?;
        let budget = core.budget().as_ref();
        let interrupter = core.interrupter();

        // A budget that admits nothing returns without waiting out the delay.
        if !core.shared().progress().can_continue(budget) {
            run.finish(TaskState::Exhausted);
            return Ok(false);
        }
        if interrupter.sleep(budget.initial_delay()) {
            run.finish(TaskState::Interrupted);
            return Ok(false);
        }

        loop {
            let iteration = {
                let mut progress = core.shared().progress();
                progress
                    .try_advance(budget)
                    .then(|| progress.iteration())
            };
            let Some(iteration) = iteration else {
                run.finish(TaskState::Exhausted);
                return Ok(false);
            };

            debug!(task = %core.name(), iteration, "running iteration");
            match op() {
                Ok(true) => {
                    run.finish(TaskState::Completed);
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    run.finish(TaskState::Failed);
                    return Err(err);
                }
            }

            // No trailing wait after the last permitted iteration.
            if !core.shared().progress().can_continue(budget) {
                run.finish(TaskState::Exhausted);
                return Ok(false);
            }
            if interrupter.sleep(budget.interval()) {
                run.finish(TaskState::Interrupted);
                return Ok(false);
            }
        }
    }
}

impl Task for ForegroundTask {
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
