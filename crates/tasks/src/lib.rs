//! `cadence-tasks` — bounded repeating tasks.
//!
//! ## Design
//!
//! - A task repeats a caller-supplied operation until it returns `true` or
//!   its [`Budget`](cadence_core::Budget) denies another iteration
//! - [`ForegroundTask`] iterates and sleeps on the calling thread
//! - [`BackgroundTask`] lets a [`Scheduler`] pace the iterations while the
//!   caller blocks on the outcome
//! - Tasks are single-use; a second `run` is an error
//! - Budget exhaustion is `Ok(false)`, never an error
//!
//! ```no_run
//! use std::time::Duration;
//! use cadence_core::Budgets;
//! use cadence_tasks::Tasks;
//!
//! let mut task = Tasks::foreground_task()
//!     .with_name("reconnect")
//!     .with_budget(
//!         Budgets::iteration_budget()
//!             .with_max_iterations(Budgets::at_least_once(3))
//!             .with_interval(Duration::from_millis(500))
//!             .build(),
//!     )
//!     .build();
//!
//! let connected = task.run(|| std::net::TcpStream::connect("127.0.0.1:5672").is_ok())?;
//! # Ok::<(), cadence_core::TaskError>(())
//! ```

pub mod background;
pub mod foreground;
pub mod interrupt;
pub mod registry;
pub mod scheduler;
pub mod task;


pub use background::{BackgroundTask, BackgroundTaskBuilder};
pub use foreground::{ForegroundTask, ForegroundTaskBuilder};
pub use interrupt::Interrupter;
pub use registry::TaskRegistry;
pub use scheduler::{
    Job, JobControl, Repeat, ScheduledHandle, Scheduler, SchedulerError, ThreadScheduler,
};
pub use task::{Task, TaskState, TaskStatus};

/// Entry points for building tasks.
#[derive(Debug, Clone, Copy)]
pub struct Tasks;

impl Tasks {
    pub fn foreground_task() -> ForegroundTaskBuilder {
        ForegroundTaskBuilder::default()
    }

    pub fn background_task() -> BackgroundTaskBuilder {
        BackgroundTaskBuilder::default()
    }
}
