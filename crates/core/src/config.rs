//! Budget configuration loaded from JSON or environment variables.
//!
//! ```json
//! { "kind": "iteration_time", "max_iterations": 10, "max_duration_ms": "unlimited", "interval_ms": 250 }
//! ```
//!
//! Missing fields fall back to the builder defaults. Limits accept either a
//! number or the keyword `"unlimited"`.

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::Budget;
use crate::budgets::Budgets;

/// Errors raised while loading a budget configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid budget configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown budget kind `{0}`")]
    UnknownKind(String),

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },

    #[error("a {kind} budget does not accept `{field}`")]
    Conflict { kind: BudgetKind, field: &'static str },
}

/// Which budget policy to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    Iteration,
    Time,
    #[default]
    IterationTime,
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BudgetKind::Iteration => "iteration",
            BudgetKind::Time => "time",
            BudgetKind::IterationTime => "iteration_time",
        })
    }
}

impl FromStr for BudgetKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iteration" => Ok(BudgetKind::Iteration),
            "time" => Ok(BudgetKind::Time),
            "iteration_time" | "iteration-time" => Ok(BudgetKind::IterationTime),
            other => Err(ConfigError::UnknownKind(other.to_string())),
        }
    }
}

/// A configured bound: a number, or no bound at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    Bounded(u64),
    Unlimited,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Number(u64),
    Text(String),
}

impl FromStr for Limit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Limit::Unlimited);
        }
        s.parse::<u64>()
            .map(Limit::Bounded)
            .map_err(|_| format!("expected a number or \"unlimited\", got `{s}`"))
    }
}

impl TryFrom<LimitRepr> for Limit {
    type Error = String;

    fn try_from(value: LimitRepr) -> Result<Self, Self::Error> {
        match value {
            LimitRepr::Number(n) => Ok(Limit::Bounded(n)),
            LimitRepr::Text(s) => s.parse(),
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(value: Limit) -> Self {
        match value {
            Limit::Bounded(n) => LimitRepr::Number(n),
            Limit::Unlimited => LimitRepr::Text("unlimited".to_string()),
        }
    }
}

/// Serializable description of a budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    pub kind: BudgetKind,
    pub max_iterations: Option<Limit>,
    pub max_duration_ms: Option<Limit>,
    pub interval_ms: Option<u64>,
    pub initial_delay_ms: Option<u64>,
}

impl BudgetConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `{PREFIX}_KIND`, `{PREFIX}_MAX_ITERATIONS`, `{PREFIX}_MAX_DURATION_MS`,
    /// `{PREFIX}_INTERVAL_MS` and `{PREFIX}_INITIAL_DELAY_MS`.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like [`BudgetConfig::from_env`], with a caller-supplied variable source.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &str| {
            let key = format!("{prefix}_{suffix}");
            lookup(&key).map(|value| (key, value))
        };

        let mut config = BudgetConfig::default();

        if let Some((_, value)) = read("KIND") {
            config.kind = value.parse()?;
        }
        if let Some((key, value)) = read("MAX_ITERATIONS") {
            config.max_iterations = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = read("MAX_DURATION_MS") {
            config.max_duration_ms = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = read("INTERVAL_MS") {
            config.interval_ms = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = read("INITIAL_DELAY_MS") {
            config.initial_delay_ms = Some(parse_env(&key, &value)?);
        }

        Ok(config)
    }

    /// Build the configured budget.
    pub fn build(&self) -> Result<Arc<dyn Budget>, ConfigError> {
        let interval = self.interval_ms.map(Duration::from_millis);
        let initial_delay = self.initial_delay_ms.map(Duration::from_millis);

        let budget: Arc<dyn Budget> = match self.kind {
            BudgetKind::Iteration => {
                if self.max_duration_ms.is_some() {
                    return Err(ConfigError::Conflict {
                        kind: self.kind,
                        field: "max_duration_ms",
                    });
                }
                let mut builder = Budgets::iteration_budget();
                match self.max_iterations {
                    Some(Limit::Bounded(n)) => builder = builder.with_max_iterations(n),
                    Some(Limit::Unlimited) => builder = builder.with_unlimited_iterations(),
                    None => {}
                }
                if let Some(interval) = interval {
                    builder = builder.with_interval(interval);
                }
                if let Some(delay) = initial_delay {
                    builder = builder.with_initial_delay(delay);
                }
                Arc::new(builder.build())
            }
            BudgetKind::Time => {
                if self.max_iterations.is_some() {
                    return Err(ConfigError::Conflict {
                        kind: self.kind,
                        field: "max_iterations",
                    });
                }
                let mut builder = Budgets::time_budget();
                match self.max_duration_ms {
                    Some(Limit::Bounded(ms)) => {
                        builder = builder.with_max_duration(Duration::from_millis(ms))
                    }
                    Some(Limit::Unlimited) => builder = builder.with_unlimited_duration(),
                    None => {}
                }
                if let Some(interval) = interval {
                    builder = builder.with_interval(interval);
                }
                if let Some(delay) = initial_delay {
                    builder = builder.with_initial_delay(delay);
                }
                Arc::new(builder.build())
            }
            BudgetKind::IterationTime => {
                let mut builder = Budgets::iteration_time_budget();
                match self.max_iterations {
                    Some(Limit::Bounded(n)) => builder = builder.with_max_iterations(n),
                    Some(Limit::Unlimited) => builder = builder.with_unlimited_iterations(),
                    None => {}
                }
                match self.max_duration_ms {
                    Some(Limit::Bounded(ms)) => {
                        builder = builder.with_max_duration(Duration::from_millis(ms))
                    }
                    Some(Limit::Unlimited) => builder = builder.with_unlimited_duration(),
                    None => {}
                }
                if let Some(interval) = interval {
                    builder = builder.with_interval(interval);
                }
                if let Some(delay) = initial_delay {
                    builder = builder.with_initial_delay(delay);
                }
                Arc::new(builder.build())
            }
        };

        tracing::debug!(kind = %self.kind, budget = ?budget, "built budget from configuration");
        Ok(budget)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
