use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// When a task runs: once at a fixed instant, or repeatedly at an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Run exactly once at `at`. Exhausted after the first run.
    OneTime { at: DateTime<Utc> },
    /// Run every `interval`, starting one interval after submission.
    Recurring { interval: Duration },
}

impl SchedulingStrategy {
    pub fn one_time(at: DateTime<Utc>) -> Self {
        Self::OneTime { at }
    }

    /// One-time run `delay` from now.
    pub fn after(delay: Duration) -> Self {
        let at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::OneTime { at }
    }

    pub fn recurring(interval: Duration) -> Self {
        Self::Recurring { interval }
    }

    /// Next due time given the previous one. Reads the clock only when
    /// `last_run_at` is `None` and the strategy needs a base time.
    pub fn next_run_at(&self, last_run_at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (self, last_run_at) {
            (Self::Recurring { .. }, None) => self.next_run_from(None, Utc::now()),
            _ => self.next_run_from(last_run_at, DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Clock-free form of [`next_run_at`](Self::next_run_at); `now` is the
    /// base for a recurring strategy that has never run.
    pub fn next_run_from(
        &self,
        last_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match *self {
            Self::OneTime { at } => match last_run_at {
                None => Some(at),
                Some(_) => None,
            },
            Self::Recurring { interval } => {
                let base = last_run_at.unwrap_or(now);
                // Overflowing the timestamp range ends the series.
                TimeDelta::from_std(interval)
                    .ok()
                    .and_then(|d| base.checked_add_signed(d))
            }
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Recurring { .. })
    }
}
