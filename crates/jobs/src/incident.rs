//! Incidents raised for jobs, and the escalation rules that create them.
//!
//! A job holds at most one open incident. Raising a new one first resolves
//! the previous one, in the same decision.

use serde::{Deserialize, Serialize};

use jobflow_core::{
    ElementInstanceKey, IncidentKey, JobKey, KeyGenerator, ProcessDefinitionKey, ProcessInstanceKey,
    Rejection,
};
use jobflow_events::{Command, Event, ValueType};

use crate::index::JobIndex;
use crate::job::{JobRecord, JobState};
use crate::PartitionEvent;

/// Default incident message when a job ran out of retries without a reason.
pub const NO_RETRIES_LEFT: &str = "No more retries left.";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    JobNoRetries,
    UnhandledErrorEvent,
    MessageSizeExceeded,
}

impl core::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ErrorType::JobNoRetries => "JOB_NO_RETRIES",
            ErrorType::UnhandledErrorEvent => "UNHANDLED_ERROR_EVENT",
            ErrorType::MessageSizeExceeded => "MESSAGE_SIZE_EXCEEDED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub job_key: Option<JobKey>,
    pub element_instance_key: ElementInstanceKey,
    pub process_instance_key: ProcessInstanceKey,
    pub process_definition_key: ProcessDefinitionKey,
    pub bpmn_process_id: String,
    pub element_id: String,
}

impl IncidentRecord {
    pub fn for_job(job_key: JobKey, job: &JobRecord, error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            error_message: message.into(),
            job_key: Some(job_key),
            element_instance_key: job.element_instance_key,
            process_instance_key: job.process_instance_key,
            process_definition_key: job.process_definition_key,
            bpmn_process_id: job.bpmn_process_id.clone(),
            element_id: job.element_id.clone(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentIntent {
    Created,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    pub intent: IncidentIntent,
    pub incident_key: IncidentKey,
    pub incident: IncidentRecord,
}

impl Event for IncidentEvent {
    fn intent(&self) -> &'static str {
        match self.intent {
            IncidentIntent::Created => "CREATED",
            IncidentIntent::Resolved => "RESOLVED",
        }
    }

    fn value_type(&self) -> ValueType {
        ValueType::Incident
    }

    fn key(&self) -> i64 {
        self.incident_key.value()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentCommand {
    #[serde(rename_all = "camelCase")]
    Resolve { incident_key: IncidentKey },
}

impl Command for IncidentCommand {
    fn intent(&self) -> &'static str {
        match self {
            IncidentCommand::Resolve { .. } => "RESOLVE",
        }
    }

    fn value_type(&self) -> ValueType {
        ValueType::Incident
    }

    fn target_key(&self) -> Option<i64> {
        match self {
            IncidentCommand::Resolve { incident_key } => Some(incident_key.value()),
        }
    }
}

/// Escalation of failed jobs into incidents.
pub struct IncidentEscalation;

impl IncidentEscalation {
    /// Events resolving the job's open incident (if any) and creating a new one.
    pub fn raise(
        state: &JobIndex,
        keys: &mut KeyGenerator,
        job_key: JobKey,
        job: &JobRecord,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Vec<PartitionEvent> {
        let mut events: Vec<PartitionEvent> = Self::resolve_open(state, job_key).into_iter().collect();

        let incident_key: IncidentKey = keys.next_key();
        events.push(PartitionEvent::Incident(IncidentEvent {
            intent: IncidentIntent::Created,
            incident_key,
            incident: IncidentRecord::for_job(job_key, job, error_type, message),
        }));
        events
    }

    /// Event resolving the job's open incident, if it has one.
    pub fn resolve_open(state: &JobIndex, job_key: JobKey) -> Option<PartitionEvent> {
        let incident_key = state.open_incident_for_job(job_key)?;
        let incident = state.incident(incident_key)?;
        Some(PartitionEvent::Incident(IncidentEvent {
            intent: IncidentIntent::Resolved,
            incident_key,
            incident: incident.clone(),
        }))
    }

    /// Incident message for a job that failed without retries.
    pub fn no_retries_message(job: &JobRecord) -> String {
        if job.error_message.is_empty() {
            NO_RETRIES_LEFT.to_string()
        } else {
            job.error_message.clone()
        }
    }

    pub fn unhandled_error_message(error_code: &str, error_message: &str) -> String {
        format!(
            "Expected to throw an error event with the code '{error_code}' with message '{error_message}', \
             but it was not caught. No error events are available in the scope."
        )
    }

    pub fn message_size_exceeded_message(job_key: JobKey, expected_size: usize) -> String {
        format!(
            "The job with key '{job_key}' can not be activated, because with the collected variables it is \
             larger than the configured message size ({expected_size} bytes). Try to reduce the size by \
             reducing the number of fetched variables or modifying the variable values."
        )
    }

    /// Decide an explicit RESOLVE.
    ///
    /// A job incident cannot be resolved while the job still has no retries;
    /// retries must be updated first.
    pub fn handle_resolve(state: &JobIndex, incident_key: IncidentKey) -> Result<PartitionEvent, Rejection> {
        let incident = state.incident(incident_key).ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to resolve incident with key '{incident_key}', but no such incident was found"
            ))
        })?;

        if let Some(job_key) = incident.job_key {
            let job_state = state.state(job_key);
            let exhausted = state.get(job_key).is_some_and(|job| job.retries <= 0);
            if matches!(job_state, JobState::Failed | JobState::ErrorThrown) && exhausted {
                return Err(Rejection::invalid_state(format!(
                    "Expected to resolve incident with key '{incident_key}', but job with key '{job_key}' \
                     has no retries left"
                )));
            }
        }

        Ok(PartitionEvent::Incident(IncidentEvent {
            intent: IncidentIntent::Resolved,
            incident_key,
            incident: incident.clone(),
        }))
    }
}
