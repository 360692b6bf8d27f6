use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};

use super::core::{Lifecycle, SchedulerService};
use super::worker::{WorkerContext, WorkerPool};

/// Outcome of [`SchedulerService::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited before the timeout.
    pub stopped: Vec<String>,
    /// Workers still busy at the timeout; detached, not killed.
    pub abandoned: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

impl SchedulerService {
    /// Spawn `worker_count` worker threads.
    ///
    /// Fails with `InvalidConfiguration` for zero workers or an invalid
    /// config, `AlreadyStarted` if workers are running, and
    /// `SchedulerStopped` after shutdown.
    pub fn start(&self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "worker count must be >= 1".into(),
            ));
        }
        // Configs built as struct literals never went through loading.
        self.config.validate()?;

        let mut lifecycle = self.lifecycle();
        match &*lifecycle {
            Lifecycle::Running(_) => return Err(SchedulerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(SchedulerError::SchedulerStopped),
            Lifecycle::Idle => {}
        }

        self.running.store(true, Ordering::Release);
        let ctx = WorkerContext {
            queue: Arc::clone(&self.queue),
            observers: Arc::clone(&self.observers),
            running: Arc::clone(&self.running),
            idle_poll: self.config.idle_poll(),
        };

        match WorkerPool::spawn(worker_count, &ctx) {
            Ok(pool) => {
                *lifecycle = Lifecycle::Running(pool);
                info!(
                    workers = worker_count,
                    pending = self.queue.len(),
                    observers = self.observers.len(),
                    "scheduler started"
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.queue.close();
                *lifecycle = Lifecycle::Stopped;
                Err(e)
            }
        }
    }

    /// Start with the worker count from the config (0 = available parallelism).
    pub fn start_from_config(&self) -> Result<()> {
        self.start(self.config.resolved_worker_threads())
    }

    /// Stop accepting work, wake every worker and wait up to `timeout` for
    /// them to finish their current run and exit.
    ///
    /// In-flight actions run to completion; nothing new starts. Workers that
    /// miss the deadline are abandoned and named in the report. Calling this
    /// again returns an empty report.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let previous = {
            let mut lifecycle = self.lifecycle();
            self.running.store(false, Ordering::Release);
            self.queue.close();
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        let report = match previous {
            Lifecycle::Running(pool) => {
                info!(timeout = ?timeout, "scheduler shutdown requested");
                pool.join(timeout)
            }
            Lifecycle::Idle | Lifecycle::Stopped => ShutdownReport::default(),
        };

        if report.is_clean() {
            info!(
                stopped = report.stopped.len(),
                pending = self.queue.len(),
                "scheduler shut down"
            );
        } else {
            warn!(
                stopped = report.stopped.len(),
                abandoned = report.abandoned.len(),
                "scheduler shut down with abandoned workers"
            );
        }
        report
    }

    /// Shutdown using the configured timeout.
    pub fn shutdown_with_config_timeout(&self) -> ShutdownReport {
        self.shutdown(self.config.shutdown_timeout())
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.queue.close();
            debug!("scheduler dropped while running, workers signalled to stop");
        }
    }
}
