use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound on how long an idle worker sleeps before re-checking
    /// the running flag.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// How long `shutdown` waits for workers before abandoning them.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_worker_threads() -> usize { 0 }
fn default_idle_poll_ms() -> u64 { 1000 }
fn default_shutdown_timeout_ms() -> u64 { 5000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            idle_poll_ms: default_idle_poll_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with env overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("TICKWORK_WORKER_THREADS") {
            self.worker_threads = v;
        }
        if let Some(v) = env_parsed("TICKWORK_IDLE_POLL_MS") {
            self.idle_poll_ms = v;
        }
        if let Some(v) = env_parsed("TICKWORK_SHUTDOWN_TIMEOUT_MS") {
            self.shutdown_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_poll_ms == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "idle_poll_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|v| v.parse().ok())
}
