//! Job processing core of a workflow partition.
//!
//! - [`JobIndex`]: derived job state and its secondary indices
//! - [`JobBatchCollector`]: size-bounded batch activation
//! - [`JobLifecycleProcessor`]: decides job and incident commands
//! - [`IncidentEscalation`]: turns exhausted or unhandled jobs into incidents
//!
//! Everything in this crate is deterministic and IO-free. The partition
//! runtime (log, actor, due-date checkers) lives in `jobflow-infra`.

use serde::{Deserialize, Serialize};

use jobflow_core::{ElementInstanceKey, JobKey};
use jobflow_events::{Command, Event, ValueType};

pub mod batch;
pub mod collaborators;
pub mod incident;
pub mod index;
pub mod job;
pub mod processor;

pub use batch::{JobBatchCollector, TooLargeJob};
pub use collaborators::{
    CatchEventLookup, ErrorCatchTarget, InMemoryProcessState, InMemoryVariables, MaxRecordSize, ProcessState,
    VariableStore, WriteBudget,
};
pub use incident::{
    ErrorType, IncidentCommand, IncidentEscalation, IncidentEvent, IncidentIntent, IncidentRecord,
    NO_RETRIES_LEFT,
};
pub use index::{DueDateCursor, JobIndex};
pub use job::{
    ActivateJobs, ActivatedJob, CompleteJob, FailJob, JobBatchActivated, JobCommand, JobEvent, JobIntent,
    JobRecord, JobState, ThrowJobError, ThrownErrorTarget, UpdateJobRetries, UpdateJobTimeout, Variables,
};
pub use processor::JobLifecycleProcessor;

/// Any command the partition accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "valueType", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionCommand {
    Job(JobCommand),
    Incident(IncidentCommand),
}

impl From<JobCommand> for PartitionCommand {
    fn from(command: JobCommand) -> Self {
        PartitionCommand::Job(command)
    }
}

impl From<IncidentCommand> for PartitionCommand {
    fn from(command: IncidentCommand) -> Self {
        PartitionCommand::Incident(command)
    }
}

impl Command for PartitionCommand {
    fn intent(&self) -> &'static str {
        match self {
            PartitionCommand::Job(c) => c.intent(),
            PartitionCommand::Incident(c) => c.intent(),
        }
    }

    fn value_type(&self) -> ValueType {
        match self {
            PartitionCommand::Job(c) => c.value_type(),
            PartitionCommand::Incident(c) => c.value_type(),
        }
    }

    fn target_key(&self) -> Option<i64> {
        match self {
            PartitionCommand::Job(c) => c.target_key(),
            PartitionCommand::Incident(c) => c.target_key(),
        }
    }
}

/// Any event the partition appends and replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "valueType", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionEvent {
    Job(JobEvent),
    JobBatch(JobBatchActivated),
    Incident(IncidentEvent),
}

/// A due date introduced by an applied event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DueDate {
    /// An activated job times out after this instant.
    Deadline(i64),
    /// A backed-off job recurs at this instant.
    Backoff(i64),
}

impl PartitionEvent {
    /// Due dates this event adds to the index; used to pull checkers forward.
    pub fn due_dates(&self) -> Vec<DueDate> {
        match self {
            PartitionEvent::JobBatch(batch) => batch
                .jobs
                .iter()
                .filter_map(|entry| entry.job.deadline.map(DueDate::Deadline))
                .collect(),
            PartitionEvent::Job(event) => match event.intent {
                JobIntent::TimeoutUpdated => event.job.deadline.map(DueDate::Deadline).into_iter().collect(),
                JobIntent::Failed => event.job.recur_at.map(DueDate::Backoff).into_iter().collect(),
                _ => Vec::new(),
            },
            PartitionEvent::Incident(_) => Vec::new(),
        }
    }

    /// Job addressed by this event, if it is about a single job.
    pub fn job_key(&self) -> Option<JobKey> {
        match self {
            PartitionEvent::Job(event) => Some(event.job_key),
            PartitionEvent::Incident(event) => event.incident.job_key,
            PartitionEvent::JobBatch(_) => None,
        }
    }
}

impl Event for PartitionEvent {
    fn intent(&self) -> &'static str {
        match self {
            PartitionEvent::Job(e) => e.intent(),
            PartitionEvent::JobBatch(e) => e.intent(),
            PartitionEvent::Incident(e) => e.intent(),
        }
    }

    fn value_type(&self) -> ValueType {
        match self {
            PartitionEvent::Job(e) => e.value_type(),
            PartitionEvent::JobBatch(e) => e.value_type(),
            PartitionEvent::Incident(e) => e.value_type(),
        }
    }

    fn key(&self) -> i64 {
        match self {
            PartitionEvent::Job(e) => e.key(),
            PartitionEvent::JobBatch(e) => e.key(),
            PartitionEvent::Incident(e) => e.key(),
        }
    }
}

/// Commands written for the process-execution state machine.
///
/// The job processor only writes them; process execution consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementCommand {
    /// Continue the flow after the job's element completed.
    #[serde(rename_all = "camelCase")]
    CompleteElement {
        element_instance_key: ElementInstanceKey,
        variables: Variables,
    },
    /// Hand a caught business error to its catch event.
    #[serde(rename_all = "camelCase")]
    ThrowError {
        element_instance_key: ElementInstanceKey,
        catch_element_id: String,
        scope_key: ElementInstanceKey,
        error_code: String,
        error_message: String,
        variables: Variables,
    },
}

impl Command for ElementCommand {
    fn intent(&self) -> &'static str {
        match self {
            ElementCommand::CompleteElement { .. } => "COMPLETE_ELEMENT",
            ElementCommand::ThrowError { .. } => "THROW_ERROR",
        }
    }

    fn value_type(&self) -> ValueType {
        ValueType::ProcessInstance
    }

    fn target_key(&self) -> Option<i64> {
        match self {
            ElementCommand::CompleteElement { element_instance_key, .. }
            | ElementCommand::ThrowError { element_instance_key, .. } => Some(element_instance_key.value()),
        }
    }
}
