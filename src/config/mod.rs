//! Configuration module for tokio_workers.
//!
//! This module provides centralized configuration loading from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_workers::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Workers: {}", config.pool.workers);
//! println!("Backend: {}", config.backend.backend_type.as_str());
//! ```

mod backend;
mod error;
mod logging;
mod parse;
mod pool;

pub use backend::{BackendConfig, BackendType};
pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use parse::parse_duration;
pub use pool::PoolConfig;

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Pool sizing, deadline and policies.
    pub pool: PoolConfig,
    /// Worker backend selection and launch options.
    pub backend: BackendConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            pool: PoolConfig::from_env()?,
            backend: BackendConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Pool: {}", self.pool.name);
        if self.pool.workers == 0 {
            info!("  Workers: auto ({})", self.pool.options().resolved_base_size());
        } else {
            info!(
                "  Workers: {} (resolved {})",
                self.pool.workers,
                self.pool.options().resolved_base_size()
            );
        }
        info!("  Timeout: {}ms", self.pool.timeout.as_millis());

        match self.pool.max_pending {
            Some(max) => info!("  Max pending: {}", max),
            None => info!("  Max pending: unbounded"),
        }

        info!(
            "  On timeout: {:?}, on fault: {:?}",
            self.pool.timeout_policy, self.pool.fault_policy
        );
        info!("  Backend: {}", self.backend.backend_type.as_str());

        if let Some(ref program) = self.backend.program {
            info!("  Worker program: {}", program.display());
        }

        if let Some(ref cwd) = self.backend.cwd {
            info!("  Worker cwd: {}", cwd.display());
        }

        if self.backend.clear_env {
            info!("  Worker env: cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{FaultPolicy, TimeoutPolicy};
    use std::time::Duration;

    #[test]
    fn test_pool_and_backend_defaults() {
        // Clear all env vars that might affect the test
        for key in [
            "POOL_NAME",
            "POOL_WORKERS",
            "POOL_TIMEOUT",
            "POOL_MAX_PENDING",
            "POOL_OVERSUBSCRIBE",
            "POOL_ON_TIMEOUT",
            "POOL_ON_FAULT",
            "POOL_BACKEND",
            "WORKER_PROGRAM",
            "WORKER_ARGS",
            "WORKER_CWD",
            "WORKER_CLEAR_ENV",
            "WORKER_READY_TIMEOUT",
        ] {
            std::env::remove_var(key);
        }

        let pool = PoolConfig::from_env().expect("Should load pool config");
        assert_eq!(pool.name, "pool");
        assert_eq!(pool.workers, 0); // Auto-detect
        assert_eq!(pool.timeout, Duration::from_secs(30));
        assert!(pool.max_pending.is_none());
        assert_eq!(pool.timeout_policy, TimeoutPolicy::Reclaim);
        assert_eq!(pool.fault_policy, FaultPolicy::Replace);

        let backend = BackendConfig::from_env().expect("Should load backend config");
        assert_eq!(backend.backend_type, BackendType::Thread);
        assert!(backend.program.is_none());
        assert_eq!(backend.ready_timeout, Some(Duration::from_secs(10)));
    }
}
