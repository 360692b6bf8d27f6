//! Execution observers and the registry that fans events out to them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::error::ActionError;
use crate::task::{panic_message, ScheduledTask};

/// Hook notified of every run performed by any worker.
///
/// Called inline on the executing worker thread, so implementations must be
/// thread-safe and should return quickly.
pub trait ExecutionObserver: Send + Sync {
    fn on_started(&self, task: &ScheduledTask);

    fn on_completed(&self, task: &ScheduledTask);

    fn on_failed(&self, task: &ScheduledTask, error: &ActionError);
}

/// Handle returned by registration, used to remove an observer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn ExecutionObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub(crate) fn add(&self, observer: Arc<dyn ExecutionObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn notify_started(&self, task: &ScheduledTask) {
        self.each("on_started", task, |o| o.on_started(task));
    }

    pub(crate) fn notify_completed(&self, task: &ScheduledTask) {
        self.each("on_completed", task, |o| o.on_completed(task));
    }

    pub(crate) fn notify_failed(&self, task: &ScheduledTask, error: &ActionError) {
        self.each("on_failed", task, |o| o.on_failed(task, error));
    }

    /// Call `hook` on every observer. The list is cloned first so no lock is
    /// held while observer code runs; a panicking observer is logged and
    /// skipped.
    fn each(&self, hook: &str, task: &ScheduledTask, f: impl Fn(&dyn ExecutionObserver)) {
        let observers: Vec<Arc<dyn ExecutionObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
                warn!(
                    task_id = %task.id(),
                    hook,
                    panic = %panic_message(payload.as_ref()),
                    "observer panicked"
                );
            }
        }
    }
}

fn current_worker() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

/// Observer that writes one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_started(&self, task: &ScheduledTask) {
        info!(
            task_id = %task.id(),
            task = task.name(),
            worker = %current_worker(),
            "task started"
        );
    }

    fn on_completed(&self, task: &ScheduledTask) {
        info!(
            task_id = %task.id(),
            task = task.name(),
            worker = %current_worker(),
            "task completed successfully"
        );
    }

    fn on_failed(&self, task: &ScheduledTask, error: &ActionError) {
        warn!(
            task_id = %task.id(),
            task = task.name(),
            worker = %current_worker(),
            error = %error,
            "task failed"
        );
    }
}
