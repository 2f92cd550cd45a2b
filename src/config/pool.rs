//! Pool configuration.

use std::time::Duration;

use super::parse::{env_bool, env_duration, env_opt, env_or, env_parse};
use super::ConfigError;
use crate::pool::{FaultPolicy, PoolOptions, TimeoutPolicy};

/// Pool configuration loaded from environment.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    /// Requested worker count (0 = available parallelism).
    pub workers: usize,
    pub oversubscribe: bool,
    pub timeout: Duration,
    /// Pending queue capacity (None = unbounded).
    pub max_pending: Option<usize>,
    pub timeout_policy: TimeoutPolicy,
    pub fault_policy: FaultPolicy,
}

impl PoolConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout = env_duration("POOL_TIMEOUT", "30s")?.ok_or_else(|| ConfigError::Invalid {
            key: "POOL_TIMEOUT".into(),
            message: "assignment timeout cannot be disabled".into(),
        })?;

        // 0 and unset both mean unbounded
        let max_pending = match env_parse("POOL_MAX_PENDING", 0usize)? {
            0 => None,
            n => Some(n),
        };

        Ok(Self {
            name: env_or("POOL_NAME", "pool"),
            workers: env_parse("POOL_WORKERS", 0usize)?,
            oversubscribe: env_bool("POOL_OVERSUBSCRIBE", false),
            timeout,
            max_pending,
            timeout_policy: Self::parse_timeout_policy(env_opt("POOL_ON_TIMEOUT"))?,
            fault_policy: Self::parse_fault_policy(env_opt("POOL_ON_FAULT"))?,
        })
    }

    /// Build the options a [`WorkerPool`](crate::pool::WorkerPool) is created with.
    pub fn options(&self) -> PoolOptions {
        let options = PoolOptions::new()
            .with_name(self.name.clone())
            .with_base_size(self.workers)
            .with_oversubscribe(self.oversubscribe)
            .with_timeout(self.timeout)
            .with_timeout_policy(self.timeout_policy)
            .with_fault_policy(self.fault_policy);

        match self.max_pending {
            Some(max) => options.with_max_pending(max),
            None => options,
        }
    }

    fn parse_timeout_policy(raw: Option<String>) -> Result<TimeoutPolicy, ConfigError> {
        match raw.map(|v| v.to_lowercase()).as_deref() {
            None | Some("reclaim") => Ok(TimeoutPolicy::Reclaim),
            Some("replace") => Ok(TimeoutPolicy::Replace),
            Some(other) => Err(ConfigError::Invalid {
                key: "POOL_ON_TIMEOUT".into(),
                message: format!("expected reclaim or replace, got '{}'", other),
            }),
        }
    }

    fn parse_fault_policy(raw: Option<String>) -> Result<FaultPolicy, ConfigError> {
        match raw.map(|v| v.to_lowercase()).as_deref() {
            None | Some("replace") => Ok(FaultPolicy::Replace),
            Some("retire") => Ok(FaultPolicy::Retire),
            Some(other) => Err(ConfigError::Invalid {
                key: "POOL_ON_FAULT".into(),
                message: format!("expected replace or retire, got '{}'", other),
            }),
        }
    }
}
