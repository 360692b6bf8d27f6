use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ActionError;
use crate::strategy::SchedulingStrategy;

/// Stable identifier assigned to a task at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A unit of work the scheduler can run.
///
/// The scheduler never inspects an action beyond calling [`execute`](Action::execute)
/// and reading its name for logs and metrics. Closures returning
/// `Result<(), ActionError>` implement this trait directly.
pub trait Action: Send + 'static {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str {
        "action"
    }

    fn execute(&self) -> Result<(), ActionError>;
}

impl<F> Action for F
where
    F: Fn() -> Result<(), ActionError> + Send + 'static,
{
    fn execute(&self) -> Result<(), ActionError> {
        self()
    }
}

/// A closure with a name, built by [`action_fn`].
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> Action for FnAction<F>
where
    F: Fn() -> Result<(), ActionError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self) -> Result<(), ActionError> {
        (self.f)()
    }
}

/// Wrap a closure as a named [`Action`].
pub fn action_fn<F>(name: impl Into<String>, f: F) -> FnAction<F>
where
    F: Fn() -> Result<(), ActionError> + Send + 'static,
{
    FnAction { name: name.into(), f }
}

/// An action bound to its strategy, plus run bookkeeping.
///
/// Owned by the due queue while pending and by exactly one worker while it
/// runs, so the timestamps need no locking.
pub struct ScheduledTask {
    id: TaskId,
    action: Box<dyn Action>,
    strategy: SchedulingStrategy,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    run_count: u64,
}

impl ScheduledTask {
    /// Wrap an action and compute its first due time.
    pub fn new(action: Box<dyn Action>, strategy: SchedulingStrategy) -> Self {
        let next_run_at = strategy.next_run_at(None);
        Self {
            id: TaskId::new(),
            action,
            strategy,
            next_run_at,
            last_run_at: None,
            run_count: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.action.name()
    }

    pub fn strategy(&self) -> &SchedulingStrategy {
        &self.strategy
    }

    /// Due time of the pending run; during observer hooks this is the run
    /// currently executing.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.next_run_at
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    /// Completed runs, successful or not.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn has_more_runs(&self) -> bool {
        self.next_run_at.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Run the action once. Panics are caught and reported as
    /// [`ActionError::Panicked`].
    pub(crate) fn run(&self) -> Result<(), ActionError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.action.execute())) {
            Ok(result) => result,
            Err(payload) => Err(ActionError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Record a finished run and ask the strategy for the next one.
    pub(crate) fn advance(&mut self) {
        self.last_run_at = self.next_run_at;
        self.run_count += 1;
        self.next_run_at = self.strategy.next_run_at(self.last_run_at);
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("strategy", &self.strategy)
            .field("next_run_at", &self.next_run_at)
            .field("last_run_at", &self.last_run_at)
            .field("run_count", &self.run_count)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
