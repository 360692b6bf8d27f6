//! Scheduler runner -- the service facade and its worker pool.
//!
//! Split into focused submodules:
//! - `core`: SchedulerService struct, constructor, submission, observers, accessors
//! - `lifecycle`: start, shutdown with timeout, drop
//! - `worker`: the per-thread wait/take/execute/reschedule loop

mod core;
mod lifecycle;
mod worker;
#[cfg(test)]
mod tests;

pub use self::core::SchedulerService;
pub use self::lifecycle::ShutdownReport;
