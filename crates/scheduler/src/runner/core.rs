use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::observer::{ExecutionObserver, ObserverId, ObserverRegistry};
use crate::queue::DueQueue;
use crate::strategy::SchedulingStrategy;
use crate::task::{Action, ScheduledTask, TaskId};

use super::worker::WorkerPool;

pub(super) enum Lifecycle {
    /// Accepting submissions, no workers yet.
    Idle,
    Running(WorkerPool),
    /// Terminal.
    Stopped,
}

/// The task scheduler. Owns the due queue and a pool of worker threads that
/// run each [`Action`] at (or after) the time its strategy names.
///
/// Tasks may be submitted before [`start`](Self::start); they run once
/// workers exist.
pub struct SchedulerService {
    pub(super) config: SchedulerConfig,
    pub(super) queue: Arc<DueQueue>,
    pub(super) observers: Arc<ObserverRegistry>,
    /// Cleared on shutdown; workers check it before every take.
    pub(super) running: Arc<AtomicBool>,
    pub(super) lifecycle: Mutex<Lifecycle>,
}

impl SchedulerService {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: Arc::new(DueQueue::new()),
            observers: Arc::new(ObserverRegistry::default()),
            running: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Schedule `action` according to `strategy`.
    ///
    /// Never waits on execution. Fails only with
    /// [`SchedulerStopped`](crate::SchedulerError::SchedulerStopped) after
    /// shutdown.
    pub fn submit(&self, action: impl Action, strategy: SchedulingStrategy) -> Result<TaskId> {
        let task = ScheduledTask::new(Box::new(action), strategy);
        let id = task.id();
        let next_run_at = task.next_run_at();

        if self.queue.insert(task)? {
            debug!(task_id = %id, next_run_at = ?next_run_at, "task submitted");
        } else {
            warn!(task_id = %id, "task has no scheduled run, discarded");
        }
        Ok(id)
    }

    /// Register an observer for every run on every worker.
    pub fn add_observer(&self, observer: Arc<dyn ExecutionObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Tasks waiting in the queue (not counting ones currently executing).
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Workers spawned by `start`; 0 before start and after shutdown.
    pub fn worker_count(&self) -> usize {
        match &*self.lifecycle() {
            Lifecycle::Running(pool) => pool.len(),
            Lifecycle::Idle | Lifecycle::Stopped => 0,
        }
    }

    pub(super) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SchedulerService {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
