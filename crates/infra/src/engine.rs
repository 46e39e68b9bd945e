//! Command processing pipeline of a partition.
//!
//! ```text
//! Command
//!   ↓
//! 1. Decide: JobLifecycleProcessor::handle(&JobIndex, &command), no mutation
//!   ↓
//! 2. Append: command record + events + follow-up commands (or one rejection)
//!   ↓
//! 3. Apply: events update the JobIndex, in order
//!   ↓
//! 4. React: jobs-available notifications, due dates, client response
//! ```
//!
//! Nothing observable happens before the append succeeded, so recovery (which
//! only replays events) can never apply an effect twice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use jobflow_core::{Clock, CommandProcessor, EventApplier, Rejection};
use jobflow_events::{Command, EventBus, RecordEnvelope, ReplayCursor, ReplayRunner};
use jobflow_jobs::{
    DueDate, IncidentIntent, JobIndex, JobLifecycleProcessor, JobRecord, MaxRecordSize, PartitionCommand,
    PartitionEvent, ProcessState, VariableStore,
};

use crate::error::EngineError;
use crate::record_log::{LoggedRecord, RecordLog, UncommittedRecord};
use crate::response::ResponseWriter;

/// Bytes reserved in every record for the event wrapper around a batch value.
pub const RECORD_VALUE_OVERHEAD: usize = 128;

/// Jobs of `job_type` became activatable; wakes pending activation requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsAvailable {
    pub job_type: String,
}

/// Where a command came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandOrigin {
    /// A client request; gets a response.
    Client,
    /// Synthesized by a due-date checker.
    Scheduler,
}

/// Result of a processed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandOutcome {
    /// Records written for the command, primary event first.
    Accepted { records: Vec<RecordEnvelope<JsonValue>> },
    Rejected { rejection: Rejection },
}

impl CommandOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            CommandOutcome::Rejected { rejection } => Some(rejection),
            CommandOutcome::Accepted { .. } => None,
        }
    }

    pub fn primary(&self) -> Option<&RecordEnvelope<JsonValue>> {
        match self {
            CommandOutcome::Accepted { records } => records.first(),
            CommandOutcome::Rejected { .. } => None,
        }
    }

    /// Intents of the written records, in log order.
    pub fn intents(&self) -> Vec<&str> {
        match self {
            CommandOutcome::Accepted { records } => records.iter().map(|r| r.intent()).collect(),
            CommandOutcome::Rejected { .. } => Vec::new(),
        }
    }
}

/// Outcome plus the due dates the applied events introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub outcome: CommandOutcome,
    pub due_dates: Vec<DueDate>,
}

/// Collaborators owned by other parts of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub variables: Arc<dyn VariableStore>,
    pub process: Arc<dyn ProcessState>,
    pub responses: Arc<dyn ResponseWriter>,
}

/// Single-writer command pipeline over a record log.
///
/// - `L`: record log (append + replay source)
/// - `N`: bus receiving [`JobsAvailable`] notifications
pub struct PartitionEngine<L, N> {
    log: L,
    notifier: N,
    state: JobIndex,
    processor: JobLifecycleProcessor,
    clock: Arc<dyn Clock>,
    responses: Arc<dyn ResponseWriter>,
}

impl<L, N> PartitionEngine<L, N>
where
    L: RecordLog,
    N: EventBus<JobsAvailable>,
{
    pub fn new(log: L, notifier: N, collaborators: Collaborators) -> Self {
        let budget = MaxRecordSize(log.max_record_size().saturating_sub(RECORD_VALUE_OVERHEAD));
        let processor = JobLifecycleProcessor::new(
            collaborators.clock.clone(),
            collaborators.variables,
            collaborators.process,
            Arc::new(budget),
        );
        Self {
            log,
            notifier,
            state: JobIndex::new(),
            processor,
            clock: collaborators.clock,
            responses: collaborators.responses,
        }
    }

    pub fn state(&self) -> &JobIndex {
        &self.state
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Last key handed out by the partition key generator.
    pub fn last_key(&self) -> i64 {
        self.processor.keys().last_key()
    }

    /// Rebuild the index and key generator by replaying event records.
    pub fn recover(&mut self) -> Result<ReplayCursor, EngineError> {
        let records = self.log.read_all()?;
        let envelopes: Vec<RecordEnvelope<JsonValue>> = records.iter().map(LoggedRecord::to_envelope).collect();

        let (state, cursor) = ReplayRunner::rebuild_from_scratch(JobIndex::new, &envelopes)?;
        self.state = state;
        self.processor.keys_mut().observe(cursor.last_key());

        info!(
            position = cursor.last_position(),
            events = cursor.events_applied(),
            jobs = self.state.len(),
            "partition state recovered"
        );
        Ok(cursor)
    }

    /// Create a job on behalf of process execution.
    pub fn create_job(&mut self, job: JobRecord) -> Result<Processed, EngineError> {
        let (job_key, event) = match self.processor.create(job) {
            Ok(created) => created,
            Err(rejection) => {
                debug!(reason = %rejection.reason, "job creation rejected");
                return Ok(Processed {
                    outcome: CommandOutcome::Rejected { rejection },
                    due_dates: Vec::new(),
                });
            }
        };

        let now = self.clock.now_millis();
        let record = UncommittedRecord::from_event(&event, now)?;
        if let Some(size) = self.oversized([&record]) {
            let rejection = self.too_large("CREATE", size);
            debug!(job_key = %job_key, reason = %rejection.reason, "job creation rejected");
            return Ok(Processed {
                outcome: CommandOutcome::Rejected { rejection },
                due_dates: Vec::new(),
            });
        }
        let committed = self.log.append(vec![record])?;
        let due_dates = self.apply_all(std::slice::from_ref(&event));
        debug!(job_key = %job_key, "job created");

        Ok(Processed {
            outcome: CommandOutcome::Accepted {
                records: committed.iter().map(LoggedRecord::to_envelope).collect(),
            },
            due_dates,
        })
    }

    /// Run one command through decide → append → apply → react.
    pub fn process(&mut self, command: PartitionCommand, origin: CommandOrigin) -> Result<Processed, EngineError> {
        let now = self.clock.now_millis();
        let command_record = UncommittedRecord::from_command(&command, now)?;

        let decision = match self.processor.handle(&self.state, &command) {
            Ok(decision) => decision,
            Err(rejection) => return self.reject(command, command_record, rejection, origin, now),
        };

        let mut results = Vec::with_capacity(decision.events.len() + decision.follow_ups.len());
        for event in &decision.events {
            results.push(UncommittedRecord::from_event(event, now)?);
        }
        for follow_up in &decision.follow_ups {
            results.push(UncommittedRecord::from_command(follow_up, now)?);
        }
        if let Some(size) = self.oversized(std::iter::once(&command_record).chain(&results)) {
            let rejection = self.too_large(command.intent(), size);
            return self.reject(command, command_record, rejection, origin, now);
        }

        let mut records = Vec::with_capacity(1 + results.len());
        records.push(command_record);
        records.extend(results);

        let committed = self.log.append(records)?;
        let due_dates = self.apply_all(&decision.events);

        let written: Vec<RecordEnvelope<JsonValue>> =
            committed.iter().skip(1).map(LoggedRecord::to_envelope).collect();
        if origin == CommandOrigin::Client {
            if let Some(primary) = written.first() {
                self.responses.write_event_on_command(primary);
            }
        }

        debug!(
            intent = command.intent(),
            key = ?command.target_key(),
            events = decision.events.len(),
            follow_ups = decision.follow_ups.len(),
            "command accepted"
        );

        Ok(Processed {
            outcome: CommandOutcome::Accepted { records: written },
            due_dates,
        })
    }

    fn reject(
        &mut self,
        command: PartitionCommand,
        command_record: UncommittedRecord,
        rejection: Rejection,
        origin: CommandOrigin,
        now: i64,
    ) -> Result<Processed, EngineError> {
        let rejection_record = UncommittedRecord::rejection_of(&command, rejection.clone(), now)?;
        let committed = if let Some(size) = self.oversized([&command_record, &rejection_record]) {
            warn!(intent = command.intent(), size, "rejected command is too large to be recorded");
            Vec::new()
        } else {
            self.log.append(vec![command_record, rejection_record])?
        };

        match origin {
            CommandOrigin::Client => {
                debug!(
                    intent = command.intent(),
                    key = ?command.target_key(),
                    rejection_type = %rejection.rejection_type,
                    reason = %rejection.reason,
                    "command rejected"
                );
                if let Some(command_record) = committed.first() {
                    self.responses
                        .write_rejection_on_command(&command_record.to_envelope(), &rejection);
                }
            }
            CommandOrigin::Scheduler => warn!(
                intent = command.intent(),
                key = ?command.target_key(),
                reason = %rejection.reason,
                "scheduled command rejected"
            ),
        }

        Ok(Processed {
            outcome: CommandOutcome::Rejected { rejection },
            due_dates: Vec::new(),
        })
    }

    /// Size of the first record the log would refuse, if any.
    fn oversized<'a>(&self, records: impl IntoIterator<Item = &'a UncommittedRecord>) -> Option<usize> {
        let max = self.log.max_record_size();
        records.into_iter().map(UncommittedRecord::value_length).find(|size| *size > max)
    }

    fn too_large(&self, intent: &str, size: usize) -> Rejection {
        Rejection::invalid_argument(format!(
            "Expected to process command '{intent}', but it produces a record of {size} bytes which exceeds the maximum record size of {} bytes",
            self.log.max_record_size()
        ))
    }

    /// Apply committed events and collect what they caused.
    fn apply_all(&mut self, events: &[PartitionEvent]) -> Vec<DueDate> {
        let mut due_dates = Vec::new();

        for event in events {
            self.state.apply(event);

            if let PartitionEvent::Incident(incident) = event {
                match incident.intent {
                    IncidentIntent::Created => info!(
                        incident_key = %incident.incident_key,
                        error_type = %incident.incident.error_type,
                        job_key = ?incident.incident.job_key.map(|key| key.value()),
                        "incident created"
                    ),
                    IncidentIntent::Resolved => info!(incident_key = %incident.incident_key, "incident resolved"),
                }
            }

            if let Some(job_type) = self.state.became_activatable(event) {
                let notification = JobsAvailable {
                    job_type: job_type.to_string(),
                };
                if let Err(err) = self.notifier.publish(notification) {
                    warn!(job_type, error = ?err, "failed to publish jobs-available notification");
                }
            }

            due_dates.extend(event.due_dates());
        }

        debug_assert_eq!(self.state.verify(), Ok(()));
        due_dates
    }
}
