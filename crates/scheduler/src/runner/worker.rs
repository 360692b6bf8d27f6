use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::observer::ObserverRegistry;
use crate::queue::DueQueue;
use crate::task::ScheduledTask;

use super::lifecycle::ShutdownReport;

/// Everything a worker thread shares with the service.
#[derive(Clone)]
pub(super) struct WorkerContext {
    pub(super) queue: Arc<DueQueue>,
    pub(super) observers: Arc<ObserverRegistry>,
    pub(super) running: Arc<AtomicBool>,
    pub(super) idle_poll: Duration,
}

struct WorkerHandle {
    name: String,
    thread: JoinHandle<()>,
}

/// Reports the worker's index when its thread exits, panics included.
struct ExitSignal {
    index: usize,
    tx: Sender<usize>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.index);
    }
}

pub(super) struct WorkerPool {
    workers: Vec<Option<WorkerHandle>>,
    exits: Receiver<usize>,
}

impl WorkerPool {
    /// Spawn `count` named worker threads. On failure the threads already
    /// spawned are left to observe the cleared running flag.
    pub(super) fn spawn(count: usize, ctx: &WorkerContext) -> Result<Self> {
        let (tx, exits) = mpsc::channel();
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            let name = format!("tickwork-worker-{index}");
            let ctx = ctx.clone();
            let signal = ExitSignal { index, tx: tx.clone() };
            let thread_name = name.clone();
            let thread = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let _signal = signal;
                    run_worker(&thread_name, &ctx);
                })
                .map_err(SchedulerError::Spawn)?;
            workers.push(Some(WorkerHandle { name, thread }));
        }

        Ok(Self { workers, exits })
    }

    pub(super) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Wait up to `timeout` for every worker to exit. Workers still running
    /// at the deadline are detached and listed as abandoned.
    pub(super) fn join(mut self, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now().checked_add(timeout);
        let mut report = ShutdownReport::default();
        let mut remaining = self.workers.len();

        while remaining > 0 {
            let wait = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            match self.exits.recv_timeout(wait) {
                Ok(index) => {
                    if let Some(worker) = self.workers.get_mut(index).and_then(Option::take) {
                        Self::reap(worker, &mut report);
                        remaining -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for worker in self.workers.into_iter().flatten() {
            if worker.thread.is_finished() {
                Self::reap(worker, &mut report);
            } else {
                warn!(worker = %worker.name, "worker did not stop in time, abandoning");
                report.abandoned.push(worker.name);
            }
        }

        report
    }

    fn reap(worker: WorkerHandle, report: &mut ShutdownReport) {
        if worker.thread.join().is_err() {
            warn!(worker = %worker.name, "worker thread panicked");
        }
        report.stopped.push(worker.name);
    }
}

/// Worker loop: wait for the earliest task to come due, take it, run it,
/// reschedule it. Every take re-validates the due time under the queue lock,
/// so a worker woken for a different task never runs one early and two
/// workers never run the same task.
pub(super) fn run_worker(name: &str, ctx: &WorkerContext) {
    debug!(worker = name, "worker started");

    while ctx.running.load(Ordering::Acquire) {
        let snapshot = ctx.queue.snapshot();
        if snapshot.closed {
            break;
        }

        match snapshot.earliest {
            // Idle: bounded so the running flag is re-read periodically.
            None => {
                ctx.queue.wait_for_change(snapshot.generation, ctx.idle_poll);
            }
            // Waiting: sleep out the remaining delta unless something is
            // inserted first.
            Some(due) => {
                let now = Utc::now();
                if due > now {
                    let delta = (due - now).to_std().unwrap_or_default();
                    ctx.queue.wait_for_change(snapshot.generation, delta);
                }
            }
        }

        if !ctx.running.load(Ordering::Acquire) {
            break;
        }

        if let Some(task) = ctx.queue.take_if_due(Utc::now()) {
            execute(name, ctx, task);
        }
    }

    info!(worker = name, "worker stopped");
}

fn execute(worker: &str, ctx: &WorkerContext, mut task: ScheduledTask) {
    debug!(worker, task_id = %task.id(), task = task.name(), "executing task");

    ctx.observers.notify_started(&task);
    match task.run() {
        Ok(()) => ctx.observers.notify_completed(&task),
        Err(e) => {
            debug!(worker, task_id = %task.id(), error = %e, "task failed");
            ctx.observers.notify_failed(&task, &e);
        }
    }

    task.advance();
    let id = task.id();
    if !task.has_more_runs() {
        debug!(task_id = %id, "task has no more executions and will not be rescheduled");
        return;
    }

    match ctx.queue.insert(task) {
        Ok(_) => {}
        Err(SchedulerError::SchedulerStopped) => {
            debug!(task_id = %id, "scheduler stopped, task not rescheduled");
        }
        Err(e) => warn!(task_id = %id, error = %e, "failed to reschedule task"),
    }
}
