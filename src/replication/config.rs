//! Replication Configuration
//!
//! Loaded from a JSON file, immutable after the module is built. Every field
//! has a default, so an empty object `{}` is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ReplicationError, ReplicationResult};
use super::throttle::ThrottlePolicy;
use super::timeout::RetryStrategyConfig;

/// Default outstanding-bytes limit: 128 MiB.
pub const DEFAULT_TOTAL_SIZE_LIMIT_BYTES: u64 = 128 * 1024 * 1024;

fn default_total_size_limit() -> u64 {
    DEFAULT_TOTAL_SIZE_LIMIT_BYTES
}

fn default_progress_retry() -> RetryStrategyConfig {
    RetryStrategyConfig::Exponential {
        initial_ms: 10_000,
        upper_bound_ms: 60_000,
    }
}

fn default_leader_retry() -> RetryStrategyConfig {
    RetryStrategyConfig::Constant { interval_ms: 500 }
}

/// Replication configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Maximum total payload bytes of unresolved operations.
    #[serde(default = "default_total_size_limit")]
    pub total_size_limit_bytes: u64,

    /// Block or reject when the limit is reached.
    #[serde(default)]
    pub throttle_policy: ThrottlePolicy,

    /// Wait for a commit notification before resubmitting.
    #[serde(default = "default_progress_retry")]
    pub progress_retry: RetryStrategyConfig,

    /// Wait after a "not leader" reply before resubmitting.
    #[serde(default = "default_leader_retry")]
    pub leader_retry: RetryStrategyConfig,

    /// Upper bound on one `replicate` call. Unbounded when absent.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            total_size_limit_bytes: default_total_size_limit(),
            throttle_policy: ThrottlePolicy::default(),
            progress_retry: default_progress_retry(),
            leader_retry: default_leader_retry(),
            max_wait_ms: None,
        }
    }
}

impl ReplicationConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> ReplicationResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ReplicationError::configuration_error(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(content: &str) -> ReplicationResult<Self> {
        let config: ReplicationConfig = serde_json::from_str(content).map_err(|e| {
            ReplicationError::configuration_error(format!("invalid config JSON: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.total_size_limit_bytes == 0 {
            return Err(ReplicationError::configuration_error(
                "total_size_limit_bytes must be positive",
            ));
        }
        if self.max_wait_ms == Some(0) {
            return Err(ReplicationError::configuration_error(
                "max_wait_ms must be positive when set",
            ));
        }
        self.progress_retry.validate("progress_retry")?;
        self.leader_retry.validate("leader_retry")?;
        Ok(())
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::ReplicationErrorKind;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_size_limit_bytes, 134_217_728);
        assert_eq!(config.throttle_policy, ThrottlePolicy::Block);
        assert_eq!(config.max_wait(), None);
    }

    #[test]
    fn test_empty_object_takes_defaults() {
        let config = ReplicationConfig::from_json("{}").unwrap();
        assert_eq!(config, ReplicationConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let config = ReplicationConfig::from_json(
            r#"{
                "throttle_policy": "reject",
                "leader_retry": {"kind": "constant", "interval_ms": 50},
                "max_wait_ms": 2000
            }"#,
        )
        .unwrap();
        assert_eq!(config.throttle_policy, ThrottlePolicy::Reject);
        assert_eq!(
            config.leader_retry,
            RetryStrategyConfig::Constant { interval_ms: 50 }
        );
        assert_eq!(config.max_wait(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = ReplicationConfig::from_json(r#"{"total_size_limit_bytes": 0}"#).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Configuration);
    }

    #[test]
    fn test_zero_max_wait_rejected() {
        assert!(ReplicationConfig::from_json(r#"{"max_wait_ms": 0}"#).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ReplicationConfig::from_json(r#"{"replication_limit": 5}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"total_size_limit_bytes": 4096}}"#).unwrap();

        let config = ReplicationConfig::load(file.path()).unwrap();
        assert_eq!(config.total_size_limit_bytes, 4096);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ReplicationConfig::load(Path::new("/nonexistent/replication.json")).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Configuration);
    }
}
