//! Due-date checkers: job timeouts and failure backoff.
//!
//! A checker is a timer owned by the partition loop, not a thread. The loop
//! asks [`DueDateChecker::is_due`] and runs [`DueDateChecker::tick`] on the
//! same thread that processes commands, so the index is never read
//! concurrently with a write.

use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use jobflow_core::JobKey;
use jobflow_jobs::{DueDate, DueDateCursor, JobCommand, JobIndex, JobRecord};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DueDateKind {
    /// Activated jobs past their deadline → `TIME_OUT`.
    Timeout,
    /// Failed jobs past their backoff → `RECUR_AFTER_BACKOFF`.
    Backoff,
}

impl DueDateKind {
    fn command_for(&self, job_key: JobKey) -> JobCommand {
        match self {
            DueDateKind::Timeout => JobCommand::TimeOut { job_key },
            DueDateKind::Backoff => JobCommand::RecurAfterBackoff { job_key },
        }
    }

    /// First instant at which an entry with this due date qualifies.
    fn qualifies_at(&self, due: i64) -> i64 {
        match self {
            // deadlines expire strictly after the due date
            DueDateKind::Timeout => due.saturating_add(1),
            DueDateKind::Backoff => due,
        }
    }

    fn accepts(&self, due_date: DueDate) -> Option<i64> {
        match (self, due_date) {
            (DueDateKind::Timeout, DueDate::Deadline(at)) | (DueDateKind::Backoff, DueDate::Backoff(at)) => Some(at),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckerState {
    Paused,
    Active,
    Cancelled,
}

/// Periodic scanner of one due-date index.
///
/// - Each tick emits at most `batch_limit` commands
/// - A tick cut short by the limit keeps a cursor and is rescheduled at once
/// - Otherwise the cursor is dropped and the next tick is one interval away,
///   or earlier if the index holds an earlier due date
#[derive(Debug, Clone)]
pub struct DueDateChecker {
    kind: DueDateKind,
    interval_ms: i64,
    batch_limit: usize,
    cursor: Option<DueDateCursor>,
    next_run: Option<i64>,
    state: CheckerState,
}

impl DueDateChecker {
    /// A paused checker; call [`DueDateChecker::resume`] to start it.
    pub fn new(kind: DueDateKind, interval: Duration, batch_limit: usize) -> Self {
        Self {
            kind,
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
            batch_limit: batch_limit.max(1),
            cursor: None,
            next_run: None,
            state: CheckerState::Paused,
        }
    }

    pub fn kind(&self) -> DueDateKind {
        self.kind
    }

    pub fn state(&self) -> CheckerState {
        self.state
    }

    pub fn cursor(&self) -> Option<DueDateCursor> {
        self.cursor
    }

    /// Planned time of the next tick, if active.
    pub fn next_run(&self) -> Option<i64> {
        self.next_run
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.state == CheckerState::Active && self.next_run.is_some_and(|at| at <= now)
    }

    /// Activate and run the first tick immediately. No-op once cancelled.
    pub fn resume(&mut self, now: i64) {
        if self.state == CheckerState::Cancelled {
            return;
        }
        self.state = CheckerState::Active;
        self.next_run = Some(now);
    }

    pub fn pause(&mut self) {
        if self.state == CheckerState::Active {
            self.state = CheckerState::Paused;
            self.next_run = None;
        }
    }

    /// Stop for good.
    pub fn cancel(&mut self) {
        self.state = CheckerState::Cancelled;
        self.next_run = None;
        self.cursor = None;
    }

    /// Pull the next tick forward if `due_date` qualifies before it.
    pub fn schedule(&mut self, due_date: DueDate) {
        if self.state != CheckerState::Active {
            return;
        }
        let Some(due) = self.kind.accepts(due_date) else {
            return;
        };
        let at = self.kind.qualifies_at(due);
        if self.next_run.is_none_or(|planned| at < planned) {
            self.next_run = Some(at);
        }
    }

    /// Scan the index once and return the commands to process.
    ///
    /// `now` is captured once by the caller for the whole tick.
    pub fn tick(&mut self, index: &JobIndex, now: i64) -> Vec<JobCommand> {
        if self.state != CheckerState::Active {
            return Vec::new();
        }

        let kind = self.kind;
        let limit = self.batch_limit;
        let mut commands = Vec::new();
        let visitor = |job_key: JobKey, _: &JobRecord| {
            if commands.len() >= limit {
                return ControlFlow::Break(());
            }
            commands.push(kind.command_for(job_key));
            ControlFlow::Continue(())
        };

        let continuation = match kind {
            DueDateKind::Timeout => index.for_each_timed_out(now, self.cursor, visitor),
            DueDateKind::Backoff => index.for_each_backed_off(now, self.cursor, visitor),
        };
        self.cursor = continuation;

        self.next_run = Some(match continuation {
            Some(_) => now,
            None => {
                let regular = now.saturating_add(self.interval_ms);
                let earliest = match kind {
                    DueDateKind::Timeout => index.next_deadline(),
                    DueDateKind::Backoff => index.next_backoff(),
                };
                earliest
                    .map(|due| kind.qualifies_at(due))
                    .filter(|at| *at > now)
                    .map_or(regular, |at| at.min(regular))
            }
        });

        debug!(
            checker = ?kind,
            emitted = commands.len(),
            continued = continuation.is_some(),
            next_run = ?self.next_run,
            "due-date check"
        );
        commands
    }
}
