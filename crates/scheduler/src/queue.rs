//! Thread-safe min-queue of scheduled tasks keyed by next due time.
//!
//! One mutex guards the heap; one condition variable wakes workers whenever
//! the queue changes (insert or close). Workers snapshot the earliest due
//! time together with a generation counter and then wait only while the
//! generation is unchanged, so an insert that lands between the snapshot and
//! the wait is never missed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::task::ScheduledTask;

/// Heap entry. The due time is copied out of the task so ordering never
/// depends on a field the owner could change.
struct QueueEntry {
    due: DateTime<Utc>,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed: BinaryHeap is a max-heap, we want earliest due (then lowest
    // sequence number) on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    generation: u64,
    closed: bool,
}

/// Earliest pending due time as seen at one instant, plus the change
/// counter to pass to [`DueQueue::wait_for_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub earliest: Option<DateTime<Utc>>,
    pub generation: u64,
    pub closed: bool,
}

#[derive(Default)]
pub struct DueQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // No user code runs under this lock, so a poisoned guard still holds a
    // consistent heap.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a task and wake every waiting worker.
    ///
    /// Returns `Ok(false)` without queueing when the task has no further
    /// runs, and `SchedulerStopped` once the queue is closed.
    pub fn insert(&self, task: ScheduledTask) -> Result<bool> {
        let Some(due) = task.next_run_at() else {
            debug!(task_id = %task.id(), "task has no next run, not queued");
            return Ok(false);
        };

        let mut state = self.lock();
        if state.closed {
            return Err(SchedulerError::SchedulerStopped);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.generation += 1;
        state.heap.push(QueueEntry { due, seq, task });
        drop(state);

        self.changed.notify_all();
        Ok(true)
    }

    /// Remove and return the earliest task if it is due at `now`. Leaves the
    /// queue untouched otherwise. A closed queue hands out nothing.
    pub fn take_if_due(&self, now: DateTime<Utc>) -> Option<ScheduledTask> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let due = state.heap.peek().is_some_and(|e| e.due <= now);
        if due {
            state.heap.pop().map(|e| e.task)
        } else {
            None
        }
    }

    pub fn peek_earliest(&self) -> Option<DateTime<Utc>> {
        self.lock().heap.peek().map(|e| e.due)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            earliest: state.heap.peek().map(|e| e.due),
            generation: state.generation,
            closed: state.closed,
        }
    }

    /// Block until the queue changes after `seen_generation` or `timeout`
    /// elapses. Returns `true` if woken by a change.
    pub fn wait_for_change(&self, seen_generation: u64, timeout: Duration) -> bool {
        // A timeout too large for `Instant` means wait for a change only.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        while state.generation == seen_generation {
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match self.changed.wait_timeout(state, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }

    /// Refuse further inserts and wake every waiter. Pending tasks stay
    /// queued until the queue is dropped.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            state.generation += 1;
        }
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}
