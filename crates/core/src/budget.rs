//! Budget policies: how many iterations, and for how long, a task may repeat.
//!
//! A budget is an immutable policy. The task driving the iterations owns the
//! counters and asks the budget, before every iteration, whether it may go on.

use std::fmt;
use std::time::Duration;

/// Delay between two iterations unless configured otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before the first iteration unless configured otherwise.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::ZERO;

/// Iteration bound of a freshly built iteration budget.
pub const DEFAULT_MAX_ITERATIONS: u64 = 5;

/// Duration bound of a freshly built time budget.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5);

/// Repetition policy consulted by task drivers.
pub trait Budget: fmt::Debug + Send + Sync {
    /// Delay before the first iteration.
    fn initial_delay(&self) -> Duration;

    /// Delay between the end of one iteration and the start of the next.
    fn interval(&self) -> Duration;

    /// Upper bound on iterations (`None` = unbounded).
    fn max_iterations(&self) -> Option<u64>;

    /// Upper bound on time elapsed since the first iteration (`None` = unbounded).
    fn max_duration(&self) -> Option<Duration>;

    /// Whether another iteration may start.
    ///
    /// `iteration` is the number of iterations already run, `elapsed` the time
    /// since the first one started (zero before the first iteration).
    fn has_next(&self, iteration: u64, elapsed: Duration) -> bool {
        self.max_iterations().is_none_or(|max| iteration < max)
            && self.max_duration().is_none_or(|max| elapsed < max)
    }
}

/// Budget bounded by iteration count only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBudget {
    max_iterations: Option<u64>,
    interval: Duration,
    initial_delay: Duration,
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self {
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            interval: DEFAULT_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl Budget for IterationBudget {
    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn max_iterations(&self) -> Option<u64> {
        self.max_iterations
    }

    fn max_duration(&self) -> Option<Duration> {
        None
    }
}

/// Budget bounded by elapsed time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    max_duration: Option<Duration>,
    interval: Duration,
    initial_delay: Duration,
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self {
            max_duration: Some(DEFAULT_MAX_DURATION),
            interval: DEFAULT_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl Budget for TimeBudget {
    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn max_iterations(&self) -> Option<u64> {
        None
    }

    fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }
}

/// Budget bounded by both iteration count and elapsed time.
///
/// Whichever limit is reached first stops the repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationTimeBudget {
    max_iterations: Option<u64>,
    max_duration: Option<Duration>,
    interval: Duration,
    initial_delay: Duration,
}

impl Default for IterationTimeBudget {
    fn default() -> Self {
        Self {
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            max_duration: Some(DEFAULT_MAX_DURATION),
            interval: DEFAULT_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl Budget for IterationTimeBudget {
    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn max_iterations(&self) -> Option<u64> {
        self.max_iterations
    }

    fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }
}

/// Builder for [`IterationBudget`].
#[derive(Debug, Clone, Default)]
pub struct IterationBudgetBuilder {
    budget: IterationBudget,
}

impl IterationBudgetBuilder {
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.budget.max_iterations = Some(max);
        self
    }

    pub fn with_unlimited_iterations(mut self) -> Self {
        self.budget.max_iterations = None;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.budget.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.budget.initial_delay = delay;
        self
    }

    pub fn build(self) -> IterationBudget {
        self.budget
    }
}

/// Builder for [`TimeBudget`].
#[derive(Debug, Clone, Default)]
pub struct TimeBudgetBuilder {
    budget: TimeBudget,
}

impl TimeBudgetBuilder {
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.budget.max_duration = Some(max);
        self
    }

    pub fn with_unlimited_duration(mut self) -> Self {
        self.budget.max_duration = None;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.budget.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.budget.initial_delay = delay;
        self
    }

    pub fn build(self) -> TimeBudget {
        self.budget
    }
}

/// Builder for [`IterationTimeBudget`].
#[derive(Debug, Clone, Default)]
pub struct IterationTimeBudgetBuilder {
    budget: IterationTimeBudget,
}

impl IterationTimeBudgetBuilder {
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.budget.max_iterations = Some(max);
        self
    }

    pub fn with_unlimited_iterations(mut self) -> Self {
        self.budget.max_iterations = None;
        self
    }

    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.budget.max_duration = Some(max);
        self
    }

    /// Drops the duration bound; the iteration bound still applies.
    pub fn with_unlimited_duration(mut self) -> Self {
        self.budget.max_duration = None;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.budget.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.budget.initial_delay = delay;
        self
    }

    pub fn build(self) -> IterationTimeBudget {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn iteration_budget_stops_at_max() {
        let budget = IterationBudgetBuilder::default().with_max_iterations(3).build();

        assert!(budget.has_next(0, Duration::ZERO));
        assert!(budget.has_next(2, Duration::from_secs(3600)));
        assert!(!budget.has_next(3, Duration::ZERO));
    }

    #[test]
    fn zero_iterations_never_starts() {
        let budget = IterationBudgetBuilder::default().with_max_iterations(0).build();
        assert!(!budget.has_next(0, Duration::ZERO));
    }

    #[test]
    fn time_budget_ignores_iteration_count() {
        let budget = TimeBudgetBuilder::default()
            .with_max_duration(Duration::from_millis(200))
            .build();

        assert!(budget.has_next(u64::MAX - 1, Duration::from_millis(199)));
        assert!(!budget.has_next(0, Duration::from_millis(200)));
        assert_eq!(budget.max_iterations(), None);
    }

    #[test]
    fn iteration_time_budget_stops_at_first_limit() {
        let budget = IterationTimeBudgetBuilder::default()
            .with_max_iterations(10)
            .with_max_duration(Duration::from_secs(1))
            .build();

        assert!(budget.has_next(9, Duration::from_millis(999)));
        assert!(!budget.has_next(10, Duration::ZERO));
        assert!(!budget.has_next(0, Duration::from_secs(1)));
    }

    #[test]
    fn unlimited_duration_keeps_iteration_bound() {
        let budget = IterationTimeBudgetBuilder::default()
            .with_max_iterations(3)
            .with_unlimited_duration()
            .build();

        assert_eq!(budget.max_duration(), None);
        assert!(budget.has_next(2, Duration::from_secs(86_400)));
        assert!(!budget.has_next(3, Duration::ZERO));
    }

    #[test]
    fn run_forever_configuration_is_valid() {
        let budget = IterationTimeBudgetBuilder::default()
            .with_max_iterations(u64::MAX)
            .with_unlimited_duration()
            .build();

        assert!(budget.has_next(1_000_000_000, Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn defaults() {
        let budget = IterationTimeBudget::default();
        assert_eq!(budget.interval(), DEFAULT_INTERVAL);
        assert_eq!(budget.initial_delay(), Duration::ZERO);
        assert_eq!(budget.max_iterations(), Some(DEFAULT_MAX_ITERATIONS));
        assert_eq!(budget.max_duration(), Some(DEFAULT_MAX_DURATION));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Independent setters produce the same budget in either order.
        #[test]
        fn independent_setters_commute(
            max in 0u64..1_000,
            duration_ms in 0u64..100_000,
            interval_ms in 0u64..10_000,
            delay_ms in 0u64..10_000,
        ) {
            let a = IterationTimeBudgetBuilder::default()
                .with_max_iterations(max)
                .with_max_duration(Duration::from_millis(duration_ms))
                .with_interval(Duration::from_millis(interval_ms))
                .with_initial_delay(Duration::from_millis(delay_ms))
                .build();
            let b = IterationTimeBudgetBuilder::default()
                .with_initial_delay(Duration::from_millis(delay_ms))
                .with_interval(Duration::from_millis(interval_ms))
                .with_max_duration(Duration::from_millis(duration_ms))
                .with_max_iterations(max)
                .build();

            prop_assert_eq!(a, b);
        }

        /// An iteration-bounded budget admits exactly `max` iterations.
        #[test]
        fn iteration_bound_admits_exactly_max(max in 0u64..500, elapsed_ms in 0u64..1_000_000) {
            let budget = IterationBudgetBuilder::default().with_max_iterations(max).build();
            let elapsed = Duration::from_millis(elapsed_ms);

            let admitted = (0..=max).take_while(|&i| budget.has_next(i, elapsed)).count() as u64;
            prop_assert_eq!(admitted, max);
        }
    }
}
