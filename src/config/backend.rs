//! Backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use super::parse::{env_bool, env_duration, env_opt, env_or};
use super::ConfigError;
use crate::backend::ProcessOptions;

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendType {
    /// One child process per worker, running `WORKER_PROGRAM`.
    Process,
    /// One OS thread per worker, running the built-in handler.
    #[default]
    Thread,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Process => "process",
            BackendType::Thread => "thread",
        }
    }
}

/// Backend configuration loaded from environment.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub backend_type: BackendType,
    /// Worker program (process backend only).
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub clear_env: bool,
    /// How long a worker process gets to report ready (None = do not wait).
    pub ready_timeout: Option<Duration>,
}

impl BackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_type = Self::parse_backend_type(&env_or("POOL_BACKEND", "thread"))?;
        let program = env_opt("WORKER_PROGRAM").map(PathBuf::from);

        if backend_type == BackendType::Process && program.is_none() {
            return Err(ConfigError::Missing {
                key: "WORKER_PROGRAM".into(),
            });
        }

        Ok(Self {
            backend_type,
            program,
            args: env_opt("WORKER_ARGS")
                .map(|v| v.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            cwd: env_opt("WORKER_CWD").map(PathBuf::from),
            clear_env: env_bool("WORKER_CLEAR_ENV", false),
            ready_timeout: env_duration("WORKER_READY_TIMEOUT", "10s")?,
        })
    }

    /// Launch options for the process backend.
    pub fn process_options(&self) -> Result<ProcessOptions, ConfigError> {
        let program = self.program.clone().ok_or_else(|| ConfigError::Missing {
            key: "WORKER_PROGRAM".into(),
        })?;

        let mut options = ProcessOptions::new(program)
            .with_args(self.args.iter().cloned())
            .with_clear_env(self.clear_env);
        if let Some(cwd) = &self.cwd {
            options = options.with_cwd(cwd);
        }
        options = match self.ready_timeout {
            Some(timeout) => options.with_ready_timeout(timeout),
            None => options.with_await_ready(false),
        };
        Ok(options)
    }

    fn parse_backend_type(raw: &str) -> Result<BackendType, ConfigError> {
        match raw.to_lowercase().as_str() {
            "process" => Ok(BackendType::Process),
            "thread" => Ok(BackendType::Thread),
            other => Err(ConfigError::Invalid {
                key: "POOL_BACKEND".into(),
                message: format!("expected process or thread, got '{}'", other),
            }),
        }
    }
}
