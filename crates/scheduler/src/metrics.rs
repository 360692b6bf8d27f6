use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ActionError;
use crate::observer::ExecutionObserver;
use crate::task::{ScheduledTask, TaskId};

/// Execution counters keyed by action name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Runs started by name.
    pub tasks_started: HashMap<String, u64>,
    /// Runs that returned `Ok` by name.
    pub tasks_completed: HashMap<String, u64>,
    /// Runs that failed or panicked by name.
    pub tasks_failed: HashMap<String, u64>,
    /// Average run duration by name, successful and failed runs alike.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last finish time by name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Runs currently executing across all workers.
    pub in_flight: usize,
}

impl SchedulerMetrics {
    /// Record a finished run.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration, succeeded: bool) {
        let outcome = if succeeded {
            &mut self.tasks_completed
        } else {
            &mut self.tasks_failed
        };
        *outcome.entry(task_name.to_string()).or_default() += 1;
        self.last_run.insert(task_name.to_string(), Utc::now());

        let count = self.finished(task_name);
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_name.to_string(), new_avg);
    }

    /// Finished runs (completed + failed) for one name.
    pub fn finished(&self, task_name: &str) -> u64 {
        self.tasks_completed.get(task_name).copied().unwrap_or(0)
            + self.tasks_failed.get(task_name).copied().unwrap_or(0)
    }

    pub fn total_failed(&self) -> u64 {
        self.tasks_failed.values().sum()
    }
}

/// Observer that maintains [`SchedulerMetrics`].
#[derive(Debug, Default)]
pub struct MetricsObserver {
    metrics: RwLock<SchedulerMetrics>,
    started_at: Mutex<HashMap<TaskId, Instant>>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current counters.
    pub fn snapshot(&self) -> SchedulerMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish(&self, task: &ScheduledTask, succeeded: bool) {
        let elapsed = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task.id())
            .map(|start| start.elapsed())
            .unwrap_or_default();

        let mut m = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        m.in_flight = m.in_flight.saturating_sub(1);
        m.record_execution(task.name(), elapsed, succeeded);
    }
}

impl ExecutionObserver for MetricsObserver {
    fn on_started(&self, task: &ScheduledTask) {
        self.started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id(), Instant::now());
        let mut m = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        *m.tasks_started.entry(task.name().to_string()).or_default() += 1;
        m.in_flight += 1;
    }

    fn on_completed(&self, task: &ScheduledTask) {
        self.finish(task, true);
    }

    fn on_failed(&self, task: &ScheduledTask, _error: &ActionError) {
        self.finish(task, false);
    }
}
