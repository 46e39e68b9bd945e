//! Partition lifecycle: recovery, processing, pause and failure.
//!
//! ```text
//! Replay ──► Processing ◄──► Paused
//!   │            │              │
//!   └────────────┴──► Failed    └──► Closed
//! ```
//!
//! Commands are only accepted while `Processing`; the due-date checkers are
//! paused, resumed and cancelled together with the phase.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use jobflow_core::Clock;
use jobflow_events::{EventBus, ReplayCursor};
use jobflow_jobs::{DueDate, JobRecord, PartitionCommand};

use crate::config::EngineConfig;
use crate::engine::{CommandOrigin, CommandOutcome, JobsAvailable, PartitionEngine, Processed};
use crate::error::EngineError;
use crate::record_log::RecordLog;
use crate::scheduler::{DueDateChecker, DueDateKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionPhase {
    Replay,
    Processing,
    Paused,
    Failed,
    Closed,
}

impl core::fmt::Display for PartitionPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            PartitionPhase::Replay => "REPLAY",
            PartitionPhase::Processing => "PROCESSING",
            PartitionPhase::Paused => "PAUSED",
            PartitionPhase::Failed => "FAILED",
            PartitionPhase::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// One partition: engine, checkers and lifecycle phase.
///
/// Not thread-safe by itself; it is driven by a single owner (the partition
/// actor or a test).
pub struct Partition<L, N> {
    name: String,
    phase: PartitionPhase,
    engine: PartitionEngine<L, N>,
    timeout_checker: DueDateChecker,
    backoff_checker: DueDateChecker,
}

impl<L, N> Partition<L, N>
where
    L: RecordLog,
    N: EventBus<JobsAvailable>,
{
    pub fn new(config: &EngineConfig, engine: PartitionEngine<L, N>) -> Self {
        Self {
            name: config.partition_name.clone(),
            phase: PartitionPhase::Replay,
            engine,
            timeout_checker: DueDateChecker::new(
                DueDateKind::Timeout,
                config.timeout_check_interval(),
                config.due_date_batch_limit,
            ),
            backoff_checker: DueDateChecker::new(
                DueDateKind::Backoff,
                config.backoff_check_interval(),
                config.due_date_batch_limit,
            ),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> PartitionPhase {
        self.phase
    }

    pub fn engine(&self) -> &PartitionEngine<L, N> {
        &self.engine
    }

    pub fn checker(&self, kind: DueDateKind) -> &DueDateChecker {
        match kind {
            DueDateKind::Timeout => &self.timeout_checker,
            DueDateKind::Backoff => &self.backoff_checker,
        }
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.engine.clock()
    }

    /// Replay the log and start processing.
    pub fn recover(&mut self) -> Result<ReplayCursor, EngineError> {
        self.transition(PartitionPhase::Replay, PartitionPhase::Processing)?;

        match self.engine.recover() {
            Ok(cursor) => {
                self.phase = PartitionPhase::Processing;
                self.resume_checkers();
                info!(partition = %self.name, position = cursor.last_position(), "partition processing");
                Ok(cursor)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Process a client command.
    pub fn submit(&mut self, command: PartitionCommand) -> Result<CommandOutcome, EngineError> {
        self.ensure_processing()?;
        let processed = self.guard(|engine| engine.process(command, CommandOrigin::Client))?;
        Ok(self.react(processed))
    }

    /// Create a job on behalf of process execution.
    pub fn create_job(&mut self, job: JobRecord) -> Result<CommandOutcome, EngineError> {
        self.ensure_processing()?;
        let processed = self.guard(|engine| engine.create_job(job))?;
        Ok(self.react(processed))
    }

    /// Run every due checker and process the commands it emits.
    ///
    /// Returns the number of commands emitted.
    pub fn run_due_checkers(&mut self) -> Result<usize, EngineError> {
        let mut emitted = 0;

        for kind in [DueDateKind::Timeout, DueDateKind::Backoff] {
            if self.phase != PartitionPhase::Processing {
                break;
            }
            let now = self.clock().now_millis();
            let commands = match kind {
                DueDateKind::Timeout if self.timeout_checker.is_due(now) => {
                    self.timeout_checker.tick(self.engine.state(), now)
                }
                DueDateKind::Backoff if self.backoff_checker.is_due(now) => {
                    self.backoff_checker.tick(self.engine.state(), now)
                }
                _ => continue,
            };

            for command in commands {
                emitted += 1;
                let processed =
                    self.guard(|engine| engine.process(PartitionCommand::Job(command), CommandOrigin::Scheduler))?;
                self.react(processed);
            }
        }

        Ok(emitted)
    }

    /// Earliest planned checker tick.
    pub fn next_wakeup(&self) -> Option<i64> {
        [self.timeout_checker.next_run(), self.backoff_checker.next_run()]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.transition(PartitionPhase::Processing, PartitionPhase::Paused)?;
        self.phase = PartitionPhase::Paused;
        self.timeout_checker.pause();
        self.backoff_checker.pause();
        info!(partition = %self.name, "partition paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.transition(PartitionPhase::Paused, PartitionPhase::Processing)?;
        self.phase = PartitionPhase::Processing;
        self.resume_checkers();
        info!(partition = %self.name, "partition resumed");
        Ok(())
    }

    pub fn close(&mut self) {
        self.phase = PartitionPhase::Closed;
        self.cancel_checkers();
        info!(partition = %self.name, "partition closed");
    }

    fn fail(&mut self, err: &EngineError) {
        self.phase = PartitionPhase::Failed;
        self.cancel_checkers();
        error!(partition = %self.name, error = %err, "partition failed");
    }

    fn resume_checkers(&mut self) {
        let now = self.clock().now_millis();
        self.timeout_checker.resume(now);
        self.backoff_checker.resume(now);
    }

    fn cancel_checkers(&mut self) {
        self.timeout_checker.cancel();
        self.backoff_checker.cancel();
    }

    fn transition(&self, from: PartitionPhase, to: PartitionPhase) -> Result<(), EngineError> {
        if self.phase == from {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition { from: self.phase, to })
        }
    }

    fn ensure_processing(&self) -> Result<(), EngineError> {
        match self.phase {
            PartitionPhase::Processing => Ok(()),
            phase => Err(EngineError::NotAccepting { phase }),
        }
    }

    /// Run an engine step; a fatal log failure fails the partition.
    fn guard<T>(
        &mut self,
        step: impl FnOnce(&mut PartitionEngine<L, N>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let result = step(&mut self.engine);
        if let Err(err @ EngineError::Log(log_error)) = &result {
            if log_error.is_fatal() {
                self.fail(err);
            }
        }
        result
    }

    fn react(&mut self, processed: Processed) -> CommandOutcome {
        for due_date in processed.due_dates {
            match due_date {
                DueDate::Deadline(_) => self.timeout_checker.schedule(due_date),
                DueDate::Backoff(_) => self.backoff_checker.schedule(due_date),
            }
        }
        processed.outcome
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use jobflow_core::{ControlledClock, ElementInstanceKey, JobKey, RejectionType};
    use jobflow_events::InMemoryEventBus;
    use jobflow_jobs::{
        ActivateJobs, CompleteJob, InMemoryProcessState, InMemoryVariables, JobCommand, JobState, Variables,
    };

    use super::*;
    use crate::engine::Collaborators;
    use crate::record_log::InMemoryRecordLog;
    use crate::response::NoopResponseWriter;
    use crate::scheduler::CheckerState;

    type TestPartition = Partition<Arc<InMemoryRecordLog>, Arc<InMemoryEventBus<JobsAvailable>>>;

    fn partition(clock: Arc<ControlledClock>, log: Arc<InMemoryRecordLog>) -> TestPartition {
        let config = EngineConfig::default().with_due_date_batch_limit(10);
        let collaborators = Collaborators {
            clock,
            variables: Arc::new(InMemoryVariables::new()),
            process: Arc::new(InMemoryProcessState::new()),
            responses: Arc::new(NoopResponseWriter),
        };
        let engine = PartitionEngine::new(log, Arc::new(InMemoryEventBus::new()), collaborators);
        Partition::new(&config, engine)
    }

    fn activate(max_jobs: i32, timeout: i64) -> PartitionCommand {
        PartitionCommand::Job(JobCommand::Activate(ActivateJobs {
            job_type: "payment".to_string(),
            worker: "w".to_string(),
            timeout,
            max_jobs_to_activate: max_jobs,
            fetch_variables: Vec::new(),
        }))
    }

    #[test]
    fn commands_are_refused_before_recovery_and_while_paused() {
        let clock = ControlledClock::arc(0);
        let mut partition = partition(clock, Arc::new(InMemoryRecordLog::new(1 << 20)));

        let err = partition.submit(activate(1, 10)).unwrap_err();
        assert_eq!(err, EngineError::NotAccepting { phase: PartitionPhase::Replay });

        partition.recover().unwrap();
        partition.pause().unwrap();
        assert_eq!(partition.checker(DueDateKind::Timeout).state(), CheckerState::Paused);
        let err = partition.submit(activate(1, 10)).unwrap_err();
        assert_eq!(err, EngineError::NotAccepting { phase: PartitionPhase::Paused });

        partition.resume().unwrap();
        assert!(partition.submit(activate(1, 10)).is_ok());
    }

    #[test]
    fn activation_pulls_the_timeout_checker_forward() {
        let clock = ControlledClock::arc(0);
        let mut partition = partition(clock.clone(), Arc::new(InMemoryRecordLog::new(1 << 20)));
        partition.recover().unwrap();
        partition.run_due_checkers().unwrap();

        partition
            .create_job(JobRecord::new("payment", 3, ElementInstanceKey::new(1)))
            .unwrap();
        partition.submit(activate(1, 250)).unwrap();

        assert_eq!(partition.next_wakeup(), Some(251));
    }

    #[test]
    fn expired_job_times_out_on_the_next_check() {
        let clock = ControlledClock::arc(0);
        let mut partition = partition(clock.clone(), Arc::new(InMemoryRecordLog::new(1 << 20)));
        partition.recover().unwrap();
        let created = partition
            .create_job(JobRecord::new("payment", 3, ElementInstanceKey::new(1)))
            .unwrap();
        let job_key = JobKey::new(created.primary().unwrap().key());
        partition.submit(activate(1, 100)).unwrap();

        clock.advance(101);
        let emitted = partition.run_due_checkers().unwrap();

        assert_eq!(emitted, 1);
        assert_eq!(
            partition.engine().state().state(job_key),
            JobState::Activatable
        );
    }

    #[test]
    fn canceling_an_expired_job_leaves_nothing_for_the_checkers() {
        let clock = ControlledClock::arc(0);
        let mut partition = partition(clock.clone(), Arc::new(InMemoryRecordLog::new(1 << 20)));
        partition.recover().unwrap();
        let created = partition
            .create_job(JobRecord::new("payment", 3, ElementInstanceKey::new(1)))
            .unwrap();
        let job_key = JobKey::new(created.primary().unwrap().key());
        partition.submit(activate(1, 100)).unwrap();
        clock.advance(500);

        let canceled = partition.submit(PartitionCommand::Job(JobCommand::Cancel { job_key })).unwrap();
        assert_eq!(canceled.intents(), vec!["CANCELED"]);

        assert_eq!(partition.run_due_checkers().unwrap(), 0);
        let stale = partition.submit(PartitionCommand::Job(JobCommand::TimeOut { job_key })).unwrap();
        assert_eq!(stale.rejection().unwrap().rejection_type, RejectionType::NotFound);
        assert_eq!(partition.phase(), PartitionPhase::Processing);
    }

    #[test]
    fn log_failure_fails_the_partition() {
        let clock = ControlledClock::arc(0);
        let log = Arc::new(InMemoryRecordLog::new(1 << 20));
        let mut partition = partition(clock, log.clone());
        partition.recover().unwrap();
        log.close();

        let err = partition.submit(activate(1, 10)).unwrap_err();

        assert!(matches!(err, EngineError::Log(_)));
        assert_eq!(partition.phase(), PartitionPhase::Failed);
        assert_eq!(partition.next_wakeup(), None);
        assert!(matches!(
            partition.resume(),
            Err(EngineError::InvalidTransition { from: PartitionPhase::Failed, .. })
        ));
    }

    fn complete_with_document(job_key: JobKey, bytes: usize) -> PartitionCommand {
        let mut variables = Variables::new();
        variables.insert("document".to_string(), json!("v".repeat(bytes)));
        PartitionCommand::Job(JobCommand::Complete(CompleteJob { job_key, variables }))
    }

    #[test]
    fn oversized_result_is_rejected_and_the_partition_keeps_processing() {
        let clock = ControlledClock::arc(0);
        let log = Arc::new(InMemoryRecordLog::new(2_000));
        let mut partition = partition(clock, log.clone());
        partition.recover().unwrap();
        let job = JobRecord::new("payment", 3, ElementInstanceKey::new(1)).with_custom_header("blob", "h".repeat(700));
        let created = partition.create_job(job).unwrap();
        let job_key = JobKey::new(created.primary().unwrap().key());
        let before = log.len();

        let outcome = partition.submit(complete_with_document(job_key, 1_500)).unwrap();

        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidArgument);
        assert!(rejection.reason.contains("exceeds the maximum record size"));
        assert_eq!(partition.phase(), PartitionPhase::Processing);
        assert_eq!(log.len(), before + 2);
        assert_eq!(partition.engine().state().state(job_key), JobState::Activatable);
        assert!(partition.submit(activate(1, 100)).unwrap().is_accepted());
    }

    #[test]
    fn oversized_command_or_job_is_refused_without_writing() {
        let clock = ControlledClock::arc(0);
        let log = Arc::new(InMemoryRecordLog::new(2_000));
        let mut partition = partition(clock, log.clone());
        partition.recover().unwrap();
        let created = partition
            .create_job(JobRecord::new("payment", 3, ElementInstanceKey::new(1)))
            .unwrap();
        let job_key = JobKey::new(created.primary().unwrap().key());
        let before = log.len();

        let command = partition.submit(complete_with_document(job_key, 3_000)).unwrap();
        let job = partition
            .create_job(JobRecord::new("payment", 3, ElementInstanceKey::new(2)).with_custom_header("blob", "h".repeat(3_000)))
            .unwrap();

        assert_eq!(command.rejection().unwrap().rejection_type, RejectionType::InvalidArgument);
        assert_eq!(job.rejection().unwrap().rejection_type, RejectionType::InvalidArgument);
        assert_eq!(log.len(), before);
        assert_eq!(partition.phase(), PartitionPhase::Processing);
    }
}
