#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::{DateTime, TimeDelta, Utc};

    use crate::config::SchedulerConfig;
    use crate::error::{ActionError, SchedulerError};
    use crate::observer::ExecutionObserver;
    use crate::runner::SchedulerService;
    use crate::strategy::SchedulingStrategy;
    use crate::task::{action_fn, ScheduledTask, TaskId};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Started(TaskId),
        Completed(TaskId),
        Failed(TaskId, String),
    }

    /// Observer that records every event in arrival order.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, Instant)>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
        }

        fn finished(&self, id: TaskId) -> Vec<Instant> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _)| matches!(e, Event::Completed(t) | Event::Failed(t, _) if *t == id))
                .map(|(_, at)| *at)
                .collect()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push((event, Instant::now()));
        }
    }

    impl ExecutionObserver for Recorder {
        fn on_started(&self, task: &ScheduledTask) {
            self.push(Event::Started(task.id()));
        }
        fn on_completed(&self, task: &ScheduledTask) {
            self.push(Event::Completed(task.id()));
        }
        fn on_failed(&self, task: &ScheduledTask, error: &ActionError) {
            self.push(Event::Failed(task.id(), error.to_string()));
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            worker_threads: 1,
            idle_poll_ms: 20,
            shutdown_timeout_ms: 2000,
        }
    }

    fn counter_action(count: &Arc<AtomicUsize>) -> impl Fn() -> Result<(), ActionError> + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn start_rejects_zero_workers() {
        let scheduler = SchedulerService::new(fast_config());
        let err = scheduler.start(0).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn start_rejects_zero_idle_poll() {
        let config = SchedulerConfig {
            idle_poll_ms: 0,
            ..fast_config()
        };
        let scheduler = SchedulerService::new(config);
        let err = scheduler.start(1).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.worker_count(), 0);
    }

    #[test]
    fn start_twice_fails() {
        let scheduler = SchedulerService::new(fast_config());
        scheduler.start(2).unwrap();
        assert_eq!(scheduler.worker_count(), 2);
        assert!(matches!(scheduler.start(1), Err(SchedulerError::AlreadyStarted)));
        assert!(scheduler.shutdown(Duration::from_secs(2)).is_clean());
    }

    #[test]
    fn submit_and_start_after_shutdown_fail() {
        let scheduler = SchedulerService::new(fast_config());
        scheduler.start(1).unwrap();
        scheduler.shutdown(Duration::from_secs(2));

        let err = scheduler
            .submit(action_fn("late", || Ok(())), SchedulingStrategy::after(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerStopped));
        assert!(matches!(scheduler.start(1), Err(SchedulerError::SchedulerStopped)));
        assert_eq!(scheduler.worker_count(), 0);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let scheduler = SchedulerService::new(fast_config());
        scheduler.start(3).unwrap();
        let first = scheduler.shutdown(Duration::from_secs(2));
        assert_eq!(first.stopped.len(), 3);
        let second = scheduler.shutdown(Duration::from_secs(2));
        assert!(second.stopped.is_empty());
        assert!(second.is_clean());
    }

    #[test]
    fn submit_before_start_runs_after_start() {
        let scheduler = SchedulerService::new(fast_config());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .submit(
                action_fn("early", counter_action(&count)),
                SchedulingStrategy::after(Duration::ZERO),
            )
            .unwrap();
        assert_eq!(scheduler.pending_tasks(), 1);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 0, "no workers yet");

        scheduler.start(1).unwrap();
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        scheduler.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn one_time_task_runs_exactly_once() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(2).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let id = scheduler
            .submit(
                action_fn("once", counter_action(&count)),
                SchedulingStrategy::after(Duration::from_millis(20)),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(100));
        scheduler.shutdown(Duration::from_secs(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_tasks(), 0, "one-time task must not be re-queued");
        assert_eq!(recorder.events(), vec![Event::Started(id), Event::Completed(id)]);
    }

    /// Records the due time each run was dispatched for, and when it began.
    #[derive(Default)]
    struct DueRecorder {
        runs: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl ExecutionObserver for DueRecorder {
        fn on_started(&self, task: &ScheduledTask) {
            if let Some(due) = task.next_run_at() {
                self.runs.lock().unwrap().push((due, Utc::now()));
            }
        }
        fn on_completed(&self, _task: &ScheduledTask) {}
        fn on_failed(&self, _task: &ScheduledTask, _error: &ActionError) {}
    }

    #[test]
    fn recurring_task_respects_interval() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(DueRecorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(2).unwrap();

        scheduler
            .submit(
                action_fn("tick", || Ok(())),
                SchedulingStrategy::recurring(Duration::from_millis(40)),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(3), || recorder.runs.lock().unwrap().len() >= 4));
        scheduler.shutdown(Duration::from_secs(2));

        let runs = recorder.runs.lock().unwrap().clone();
        for (due, began) in &runs {
            assert!(began >= due, "run began before it was due");
        }
        for pair in runs.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, TimeDelta::milliseconds(40));
        }
    }

    #[test]
    fn failing_recurring_task_keeps_its_cadence() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(1).unwrap();

        let id = scheduler
            .submit(
                action_fn("flaky", || Err(ActionError::failed("unreachable host"))),
                SchedulingStrategy::recurring(Duration::from_millis(30)),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(3), || recorder.finished(id).len() >= 3));
        scheduler.shutdown(Duration::from_secs(2));

        let failures = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Failed(t, msg) if *t == id && msg.contains("unreachable host")))
            .count();
        assert!(failures >= 3);
        assert!(!recorder.events().contains(&Event::Completed(id)));
    }

    #[test]
    fn failing_one_time_task_is_not_retried() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(1).unwrap();

        let id = scheduler
            .submit(
                action_fn("broken", || Err(ActionError::failed("bad input"))),
                SchedulingStrategy::after(Duration::ZERO),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || recorder.finished(id).len() == 1));
        thread::sleep(Duration::from_millis(100));
        scheduler.shutdown(Duration::from_secs(2));

        assert_eq!(recorder.finished(id).len(), 1);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn panicking_action_is_reported_and_worker_survives() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(1).unwrap();

        let bad = scheduler
            .submit(
                || -> Result<(), ActionError> { panic!("corrupt state") },
                SchedulingStrategy::after(Duration::ZERO),
            )
            .unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .submit(
                action_fn("after", counter_action(&count)),
                SchedulingStrategy::after(Duration::from_millis(10)),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        let report = scheduler.shutdown(Duration::from_secs(2));
        assert!(report.is_clean());
        assert!(recorder
            .events()
            .contains(&Event::Failed(bad, "action panicked: corrupt state".into())));
    }

    #[test]
    fn earlier_submission_preempts_a_waiting_worker() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(1).unwrap();

        let late = scheduler
            .submit(action_fn("late", || Ok(())), SchedulingStrategy::after(Duration::from_secs(5)))
            .unwrap();
        // Let the worker settle into its long wait.
        thread::sleep(Duration::from_millis(50));

        let submitted = Instant::now();
        let soon = scheduler
            .submit(action_fn("soon", || Ok(())), SchedulingStrategy::after(Duration::from_millis(30)))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || !recorder.finished(soon).is_empty()));
        assert!(submitted.elapsed() < Duration::from_secs(1));
        assert!(recorder.finished(late).is_empty());
        scheduler.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn single_worker_runs_tasks_in_due_order() {
        let scheduler = SchedulerService::new(fast_config());
        let order = Arc::new(Mutex::new(Vec::new()));
        let base = Utc::now() + TimeDelta::milliseconds(100);

        // Submitted out of order on purpose.
        for offset in [40_i64, 0, 30, 10, 20] {
            let order = Arc::clone(&order);
            scheduler
                .submit(
                    action_fn(format!("t{offset}"), move || {
                        order.lock().unwrap().push(offset);
                        Ok(())
                    }),
                    SchedulingStrategy::one_time(base + TimeDelta::milliseconds(offset)),
                )
                .unwrap();
        }

        scheduler.start(1).unwrap();
        assert!(wait_until(Duration::from_secs(2), || order.lock().unwrap().len() == 5));
        scheduler.shutdown(Duration::from_secs(2));

        assert_eq!(*order.lock().unwrap(), vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn recurring_task_never_runs_concurrently_with_itself() {
        let scheduler = SchedulerService::new(fast_config());
        scheduler.start(6).unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let (active, max_active, runs) = (active.clone(), max_active.clone(), runs.clone());
            scheduler
                .submit(
                    action_fn("exclusive", move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        active.fetch_sub(1, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    SchedulingStrategy::recurring(Duration::from_millis(1)),
                )
                .unwrap();
        }

        assert!(wait_until(Duration::from_secs(3), || runs.load(Ordering::SeqCst) >= 20));
        scheduler.shutdown(Duration::from_secs(2));
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_lets_in_flight_run_finish() {
        let scheduler = SchedulerService::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(1).unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let id = scheduler
            .submit(
                action_fn("slow", move || {
                    s.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(150));
                    Ok(())
                }),
                SchedulingStrategy::recurring(Duration::from_millis(1)),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst) >= 1));
        let report = scheduler.shutdown(Duration::from_secs(2));
        assert!(report.is_clean());

        let runs_at_shutdown = started.load(Ordering::SeqCst);
        let events = recorder.events();
        assert_eq!(events.last(), Some(&Event::Completed(id)), "in-flight run must finish");

        thread::sleep(Duration::from_millis(100));
        assert_eq!(started.load(Ordering::SeqCst), runs_at_shutdown, "nothing new after shutdown");
    }

    #[test]
    fn shutdown_abandons_workers_past_the_timeout() {
        let scheduler = SchedulerService::new(fast_config());
        scheduler.start(2).unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        scheduler
            .submit(
                action_fn("stuck", move || {
                    s.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(400));
                    Ok(())
                }),
                SchedulingStrategy::after(Duration::ZERO),
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst) == 1));

        let report = scheduler.shutdown(Duration::from_millis(50));
        assert!(!report.is_clean());
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.stopped.len(), 1);
        assert!(report.abandoned[0].starts_with("tickwork-worker-"));
    }

    #[test]
    fn removed_observer_sees_nothing_further() {
        let scheduler = SchedulerService::new(fast_config());
        let kept = Arc::new(Recorder::default());
        let removed = Arc::new(Recorder::default());
        scheduler.add_observer(kept.clone());
        let removed_id = scheduler.add_observer(removed.clone());
        assert_eq!(scheduler.observer_count(), 2);
        assert!(scheduler.remove_observer(removed_id));
        assert_eq!(scheduler.observer_count(), 1);

        scheduler.start(1).unwrap();
        let id = scheduler
            .submit(action_fn("observed", || Ok(())), SchedulingStrategy::after(Duration::ZERO))
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || kept.finished(id).len() == 1));
        scheduler.shutdown(Duration::from_secs(2));

        assert!(removed.events().is_empty());
    }

    #[test]
    fn insert_wakes_an_idle_worker() {
        let config = SchedulerConfig {
            idle_poll_ms: 10_000,
            ..fast_config()
        };
        let scheduler = SchedulerService::new(config);
        let recorder = Arc::new(Recorder::default());
        scheduler.add_observer(recorder.clone());
        scheduler.start(2).unwrap();
        // Let both workers settle into the idle wait on an empty queue.
        thread::sleep(Duration::from_millis(50));

        let submitted = Instant::now();
        let id = scheduler
            .submit(action_fn("wake", || Ok(())), SchedulingStrategy::after(Duration::ZERO))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || !recorder.finished(id).is_empty()));
        let finished = recorder.finished(id)[0];
        assert!(
            finished.duration_since(submitted) < Duration::from_millis(200),
            "idle worker must wake on insert, not on the poll timeout"
        );
        scheduler.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn idle_workers_notice_shutdown_promptly() {
        let config = SchedulerConfig {
            idle_poll_ms: 10_000,
            ..fast_config()
        };
        let scheduler = SchedulerService::new(config);
        scheduler.start(4).unwrap();
        thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        let report = scheduler.shutdown(Duration::from_secs(5));
        assert!(report.is_clean());
        assert_eq!(report.stopped.len(), 4);
        assert!(start.elapsed() < Duration::from_secs(2), "close must wake idle workers");
    }
}
