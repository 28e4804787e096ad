//! Entry points for building budgets.

use crate::budget::{IterationBudgetBuilder, IterationTimeBudgetBuilder, TimeBudgetBuilder};

/// Factory for the budget builders.
#[derive(Debug, Clone, Copy)]
pub struct Budgets;

impl Budgets {
    pub fn iteration_budget() -> IterationBudgetBuilder {
        IterationBudgetBuilder::default()
    }

    pub fn time_budget() -> TimeBudgetBuilder {
        TimeBudgetBuilder::default()
    }

    pub fn iteration_time_budget() -> IterationTimeBudgetBuilder {
        IterationTimeBudgetBuilder::default()
    }

    /// Clamp an iteration count so that at least one attempt is made.
    ///
    /// Handy when the count comes from user configuration where `0` means
    /// "don't retry" rather than "don't try".
    pub fn at_least_once(max_iterations: u64) -> u64 {
        max_iterations.max(1)
    }
}
