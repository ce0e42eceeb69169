//! Configuration for the processing engine.
//!
//! All of the constructors and configuration functions on [`EngineConfig`] are `const`.
//!
//! # Example
//!
//! ```
//! # use restyle::prelude::*;
//! # use std::time::Duration;
//! const CONFIG: EngineConfig = EngineConfig::new()
//!     .with_task_delay(Duration::from_millis(500))
//!     .with_cost_per_task(0.02)
//!     .with_gateway_timeout(Duration::from_secs(90));
//!
//! assert_eq!(CONFIG.estimated_cost(10), 0.2);
//! ```
use std::time::Duration;

use thiserror::Error;

const TASK_DELAY_MS: &str = "RESTYLE_TASK_DELAY_MS";
const COST_PER_TASK: &str = "RESTYLE_COST_PER_TASK";
const GATEWAY_TIMEOUT_SECS: &str = "RESTYLE_GATEWAY_TIMEOUT_SECS";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// The pause between two consecutive tasks of the same job.
    ///
    /// This is what keeps the load on the image provider at a single call at a time per job.
    pub task_delay: Duration,
    /// The informational cost of generating a single image.
    pub cost_per_task: f64,
    /// If set, generation calls taking longer than this are recorded as failures.
    pub gateway_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    pub const DEFAULT_TASK_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_COST_PER_TASK: f64 = 0.039;

    pub const fn new() -> Self {
        Self {
            task_delay: Self::DEFAULT_TASK_DELAY,
            cost_per_task: Self::DEFAULT_COST_PER_TASK,
            gateway_timeout: None,
        }
    }

    pub const fn with_task_delay(self, task_delay: Duration) -> Self {
        Self { task_delay, ..self }
    }

    pub const fn with_cost_per_task(self, cost_per_task: f64) -> Self {
        Self {
            cost_per_task,
            ..self
        }
    }

    pub const fn with_gateway_timeout(self, timeout: Duration) -> Self {
        Self {
            gateway_timeout: Some(timeout),
            ..self
        }
    }

    pub fn estimated_cost(&self, tasks: usize) -> f64 {
        tasks as f64 * self.cost_per_task
    }

    /// Build a config from the defaults overridden by any of `RESTYLE_TASK_DELAY_MS`,
    /// `RESTYLE_COST_PER_TASK`, and `RESTYLE_GATEWAY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        if let Some(millis) = parse(&lookup, TASK_DELAY_MS)? {
            config.task_delay = Duration::from_millis(millis);
        }
        if let Some(cost) = parse::<f64>(&lookup, COST_PER_TASK)? {
            if !cost.is_finite() || cost < 0.0 {
                return Err(ConfigError::Invalid {
                    name: COST_PER_TASK,
                    reason: "must be a non-negative number".to_owned(),
                });
            }
            config.cost_per_task = cost;
        }
        if let Some(secs) = parse(&lookup, GATEWAY_TIMEOUT_SECS)? {
            config.gateway_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|value| {
            value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
                name,
                reason: err.to_string(),
            })
        })
        .transpose()
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration {0}")]
    Missing(&'static str),
    #[error("Invalid configuration {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use assert_matches::assert_matches;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<_, _> = vars
            .iter()
            .map(|(name, value)| (*name, value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.task_delay, Duration::from_secs(1));
        assert_eq!(config.gateway_timeout, None);
    }

    #[test]
    fn overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (TASK_DELAY_MS, "250"),
            (COST_PER_TASK, "0.5"),
            (GATEWAY_TIMEOUT_SECS, " 30 "),
        ]))
        .unwrap();

        assert_eq!(config.task_delay, Duration::from_millis(250));
        assert_eq!(config.cost_per_task, 0.5);
        assert_eq!(config.gateway_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_matches!(
            EngineConfig::from_lookup(lookup(&[(TASK_DELAY_MS, "soon")])),
            Err(ConfigError::Invalid { name: TASK_DELAY_MS, .. })
        );
        assert_matches!(
            EngineConfig::from_lookup(lookup(&[(COST_PER_TASK, "-1")])),
            Err(ConfigError::Invalid { name: COST_PER_TASK, .. })
        );
    }

    #[test]
    fn estimated_cost_scales_with_tasks() {
        let config = EngineConfig::new().with_cost_per_task(0.25);

        assert_eq!(config.estimated_cost(4), 1.0);
        assert_eq!(config.estimated_cost(0), 0.0);
    }
}
