//! Retry interval strategies

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ReplicationError, ReplicationResult};

/// How long to wait before retry number `attempt` (0-based).
pub trait TimeoutStrategy: Send + Sync + fmt::Debug {
    fn next_timeout_after(&self, attempt: u32) -> Duration;
}

/// Doubles from `initial` on every attempt, never exceeding `upper_bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoffStrategy {
    initial: Duration,
    upper_bound: Duration,
}

impl ExponentialBackoffStrategy {
    pub fn new(initial: Duration, upper_bound: Duration) -> Self {
        Self {
            initial,
            upper_bound,
        }
    }
}

impl TimeoutStrategy for ExponentialBackoffStrategy {
    fn next_timeout_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.upper_bound, |timeout| timeout.min(self.upper_bound))
    }
}

/// Same interval for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantTimeoutStrategy {
    interval: Duration,
}

impl ConstantTimeoutStrategy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl TimeoutStrategy for ConstantTimeoutStrategy {
    fn next_timeout_after(&self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// Configured form of a [`TimeoutStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryStrategyConfig {
    Exponential { initial_ms: u64, upper_bound_ms: u64 },
    Constant { interval_ms: u64 },
}

impl RetryStrategyConfig {
    pub fn build(&self) -> Box<dyn TimeoutStrategy> {
        match *self {
            Self::Exponential {
                initial_ms,
                upper_bound_ms,
            } => Box::new(ExponentialBackoffStrategy::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(upper_bound_ms),
            )),
            Self::Constant { interval_ms } => Box::new(ConstantTimeoutStrategy::new(
                Duration::from_millis(interval_ms),
            )),
        }
    }

    pub(crate) fn validate(&self, name: &str) -> ReplicationResult<()> {
        match *self {
            Self::Exponential {
                initial_ms,
                upper_bound_ms,
            } => {
                if initial_ms == 0 {
                    return Err(ReplicationError::configuration_error(format!(
                        "{}: initial_ms must be positive",
                        name
                    )));
                }
                if upper_bound_ms < initial_ms {
                    return Err(ReplicationError::configuration_error(format!(
                        "{}: upper_bound_ms ({}) is below initial_ms ({})",
                        name, upper_bound_ms, initial_ms
                    )));
                }
            }
            Self::Constant { interval_ms } => {
                if interval_ms == 0 {
                    return Err(ReplicationError::configuration_error(format!(
                        "{}: interval_ms must be positive",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_until_cap() {
        let strategy =
            ExponentialBackoffStrategy::new(Duration::from_secs(10), Duration::from_secs(60));
        assert_eq!(strategy.next_timeout_after(0), Duration::from_secs(10));
        assert_eq!(strategy.next_timeout_after(1), Duration::from_secs(20));
        assert_eq!(strategy.next_timeout_after(2), Duration::from_secs(40));
        assert_eq!(strategy.next_timeout_after(3), Duration::from_secs(60));
        assert_eq!(strategy.next_timeout_after(200), Duration::from_secs(60));
    }

    #[test]
    fn test_constant_ignores_attempt() {
        let strategy = ConstantTimeoutStrategy::new(Duration::from_millis(500));
        assert_eq!(strategy.next_timeout_after(0), Duration::from_millis(500));
        assert_eq!(strategy.next_timeout_after(9), Duration::from_millis(500));
    }

    #[test]
    fn test_config_is_tagged_by_kind() {
        let config: RetryStrategyConfig =
            serde_json::from_str(r#"{"kind":"constant","interval_ms":250}"#).unwrap();
        assert_eq!(config, RetryStrategyConfig::Constant { interval_ms: 250 });
        assert_eq!(
            config.build().next_timeout_after(3),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = RetryStrategyConfig::Exponential {
            initial_ms: 100,
            upper_bound_ms: 50,
        };
        assert!(config.validate("progress_retry").is_err());
        assert!(RetryStrategyConfig::Constant { interval_ms: 0 }
            .validate("leader_retry")
            .is_err());
    }
}
