//! `cadence-core` — budget policies and shared task primitives.
//!
//! This crate is pure: no threads, no clocks. Task drivers live in
//! `cadence-tasks`.

pub mod budget;
pub mod budgets;
pub mod config;
pub mod error;
pub mod id;

pub use budget::{
    Budget, IterationBudget, IterationBudgetBuilder, IterationTimeBudget,
    IterationTimeBudgetBuilder, TimeBudget, TimeBudgetBuilder,
};
pub use budgets::Budgets;
pub use config::{BudgetConfig, BudgetKind, ConfigError, Limit};
pub use error::{TaskError, TaskResult};
pub use id::TaskId;
