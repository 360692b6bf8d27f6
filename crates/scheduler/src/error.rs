use thiserror::Error;

/// Errors returned synchronously to callers of the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("scheduler stopped")]
    SchedulerStopped,

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

/// Error raised by an [`Action`](crate::Action) while it runs.
///
/// Never returned to the submitter; workers route it to
/// [`ExecutionObserver::on_failed`](crate::ExecutionObserver::on_failed).
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("action panicked: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActionError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
