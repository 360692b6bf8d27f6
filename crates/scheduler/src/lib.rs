//! Concurrent task scheduler.
//!
//! A [`SchedulerService`] accepts [`Action`]s paired with a
//! [`SchedulingStrategy`], orders them by next due time in a shared
//! [`DueQueue`], and runs them on a pool of worker threads at (or after)
//! their due time. Recurring tasks are re-queued after each run; observers
//! see every start, success and failure.

pub mod config;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod queue;
pub mod runner;
pub mod strategy;
pub mod task;

pub use config::SchedulerConfig;
pub use error::{ActionError, Result, SchedulerError};
pub use metrics::{MetricsObserver, SchedulerMetrics};
pub use observer::{ExecutionObserver, ObserverId, TracingObserver};
pub use queue::{DueQueue, QueueSnapshot};
pub use runner::{SchedulerService, ShutdownReport};
pub use strategy::SchedulingStrategy;
pub use task::{action_fn, Action, FnAction, ScheduledTask, TaskId};
