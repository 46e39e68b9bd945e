use serde::{Deserialize, Serialize};

use jobflow_core::{ElementInstanceKey, JobKey, ProcessDefinitionKey, ProcessInstanceKey};
use jobflow_events::{Command, Event, ValueType};

/// Variable document (JSON object).
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a job.
///
/// Exactly one state per existing job; `NotFound` is reported for keys the
/// index does not hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Activatable,
    Activated,
    Failed,
    ErrorThrown,
    NotFound,
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            JobState::Activatable => "ACTIVATABLE",
            JobState::Activated => "ACTIVATED",
            JobState::Failed => "FAILED",
            JobState::ErrorThrown => "ERROR_THROWN",
            JobState::NotFound => "NOT_FOUND",
        };
        f.write_str(name)
    }
}

/// Where a thrown business error went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrownErrorTarget {
    /// No catch event matched; the job stays in `ERROR_THROWN` with an incident.
    NoCatchEvent,
    /// A catch event took the error over; the job is removed.
    #[serde(rename_all = "camelCase")]
    CatchEvent {
        catch_element_id: String,
        scope_key: ElementInstanceKey,
    },
}

/// A unit of work created by a service task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(rename = "type")]
    pub job_type: String,
    pub retries: i32,
    /// Epoch millis; set while the job is activated.
    pub deadline: Option<i64>,
    /// Backoff requested by the last failure, in millis.
    pub backoff: i64,
    /// Epoch millis at which a backed-off job becomes activatable again.
    pub recur_at: Option<i64>,
    pub worker: String,
    pub error_code: String,
    pub error_message: String,
    pub thrown_error: Option<ThrownErrorTarget>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub custom_headers: Variables,
    pub element_instance_key: ElementInstanceKey,
    pub process_instance_key: ProcessInstanceKey,
    pub process_definition_key: ProcessDefinitionKey,
    pub bpmn_process_id: String,
    pub element_id: String,
}

impl JobRecord {
    pub fn new(job_type: impl Into<String>, retries: i32, element_instance_key: ElementInstanceKey) -> Self {
        Self {
            job_type: job_type.into(),
            retries,
            deadline: None,
            backoff: 0,
            recur_at: None,
            worker: String::new(),
            error_code: String::new(),
            error_message: String::new(),
            thrown_error: None,
            variables: Variables::new(),
            custom_headers: Variables::new(),
            element_instance_key,
            process_instance_key: ProcessInstanceKey::new(0),
            process_definition_key: ProcessDefinitionKey::new(0),
            bpmn_process_id: String::new(),
            element_id: String::new(),
        }
    }

    pub fn with_process(
        mut self,
        process_instance_key: ProcessInstanceKey,
        process_definition_key: ProcessDefinitionKey,
        bpmn_process_id: impl Into<String>,
        element_id: impl Into<String>,
    ) -> Self {
        self.process_instance_key = process_instance_key;
        self.process_definition_key = process_definition_key;
        self.bpmn_process_id = bpmn_process_id.into();
        self.element_id = element_id.into();
        self
    }

    pub fn with_custom_header(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }
}

/// Command: ActivateJobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateJobs {
    #[serde(rename = "type")]
    pub job_type: String,
    pub worker: String,
    /// Millis a worker may hold an activated job.
    pub timeout: i64,
    pub max_jobs_to_activate: i32,
    /// Variable names to fetch; empty fetches all visible variables.
    #[serde(default)]
    pub fetch_variables: Vec<String>,
}

/// Command: CompleteJob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteJob {
    pub job_key: JobKey,
    #[serde(default)]
    pub variables: Variables,
}

/// Command: FailJob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailJob {
    pub job_key: JobKey,
    pub retries: i32,
    #[serde(default)]
    pub error_message: String,
    /// Millis before the job may be activated again; 0 retries immediately.
    #[serde(default)]
    pub backoff: i64,
}

/// Command: ThrowError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrowJobError {
    pub job_key: JobKey,
    pub error_code: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub variables: Variables,
}

/// Command: UpdateRetries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRetries {
    pub job_key: JobKey,
    pub retries: i32,
}

/// Command: UpdateTimeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobTimeout {
    pub job_key: JobKey,
    /// New timeout in millis, counted from the time the command is processed.
    pub timeout: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobCommand {
    Activate(ActivateJobs),
    Complete(CompleteJob),
    Fail(FailJob),
    ThrowError(ThrowJobError),
    #[serde(rename_all = "camelCase")]
    TimeOut { job_key: JobKey },
    #[serde(rename_all = "camelCase")]
    Cancel { job_key: JobKey },
    UpdateRetries(UpdateJobRetries),
    UpdateTimeout(UpdateJobTimeout),
    #[serde(rename_all = "camelCase")]
    RecurAfterBackoff { job_key: JobKey },
    /// Alternate backoff trigger; same contract as `RecurAfterBackoff`.
    #[serde(rename_all = "camelCase")]
    MakeActivatable { job_key: JobKey },
    #[serde(rename_all = "camelCase")]
    Yield { job_key: JobKey },
}

impl JobCommand {
    pub fn job_key(&self) -> Option<JobKey> {
        match self {
            JobCommand::Activate(_) => None,
            JobCommand::Complete(c) => Some(c.job_key),
            JobCommand::Fail(c) => Some(c.job_key),
            JobCommand::ThrowError(c) => Some(c.job_key),
            JobCommand::UpdateRetries(c) => Some(c.job_key),
            JobCommand::UpdateTimeout(c) => Some(c.job_key),
            JobCommand::TimeOut { job_key }
            | JobCommand::Cancel { job_key }
            | JobCommand::RecurAfterBackoff { job_key }
            | JobCommand::MakeActivatable { job_key }
            | JobCommand::Yield { job_key } => Some(*job_key),
        }
    }
}

impl Command for JobCommand {
    fn intent(&self) -> &'static str {
        match self {
            JobCommand::Activate(_) => "ACTIVATE",
            JobCommand::Complete(_) => "COMPLETE",
            JobCommand::Fail(_) => "FAIL",
            JobCommand::ThrowError(_) => "THROW_ERROR",
            JobCommand::TimeOut { .. } => "TIME_OUT",
            JobCommand::Cancel { .. } => "CANCEL",
            JobCommand::UpdateRetries(_) => "UPDATE_RETRIES",
            JobCommand::UpdateTimeout(_) => "UPDATE_TIMEOUT",
            JobCommand::RecurAfterBackoff { .. } => "RECUR_AFTER_BACKOFF",
            JobCommand::MakeActivatable { .. } => "MAKE_ACTIVATABLE",
            JobCommand::Yield { .. } => "YIELD",
        }
    }

    fn value_type(&self) -> ValueType {
        match self {
            JobCommand::Activate(_) => ValueType::JobBatch,
            _ => ValueType::Job,
        }
    }

    fn target_key(&self) -> Option<i64> {
        self.job_key().map(i64::from)
    }
}

/// Intent of a job event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobIntent {
    Created,
    Completed,
    Failed,
    ErrorThrown,
    TimedOut,
    Canceled,
    RetriesUpdated,
    TimeoutUpdated,
    RecurredAfterBackoff,
    Yielded,
}

impl JobIntent {
    pub fn name(&self) -> &'static str {
        match self {
            JobIntent::Created => "CREATED",
            JobIntent::Completed => "COMPLETED",
            JobIntent::Failed => "FAILED",
            JobIntent::ErrorThrown => "ERROR_THROWN",
            JobIntent::TimedOut => "TIMED_OUT",
            JobIntent::Canceled => "CANCELED",
            JobIntent::RetriesUpdated => "RETRIES_UPDATED",
            JobIntent::TimeoutUpdated => "TIMEOUT_UPDATED",
            JobIntent::RecurredAfterBackoff => "RECURRED_AFTER_BACKOFF",
            JobIntent::Yielded => "YIELDED",
        }
    }
}

/// Event on a single job. Carries the full job record after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub intent: JobIntent,
    pub job_key: JobKey,
    pub job: JobRecord,
}

impl JobEvent {
    pub fn new(intent: JobIntent, job_key: JobKey, job: JobRecord) -> Self {
        Self { intent, job_key, job }
    }

    pub fn created(job_key: JobKey, job: JobRecord) -> Self {
        Self::new(JobIntent::Created, job_key, job)
    }
}

impl Event for JobEvent {
    fn intent(&self) -> &'static str {
        self.intent.name()
    }

    fn value_type(&self) -> ValueType {
        ValueType::Job
    }

    fn key(&self) -> i64 {
        self.job_key.value()
    }
}

/// A job handed to a worker inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivatedJob {
    pub key: JobKey,
    pub job: JobRecord,
}

/// Event: JobBatch ACTIVATED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBatchActivated {
    pub batch_key: i64,
    #[serde(rename = "type")]
    pub job_type: String,
    pub worker: String,
    pub timeout: i64,
    pub max_jobs_to_activate: i32,
    pub jobs: Vec<ActivatedJob>,
    /// Set when a job did not fit into the remaining record budget.
    pub truncated: bool,
}

impl JobBatchActivated {
    pub fn empty(batch_key: i64, request: &ActivateJobs) -> Self {
        Self {
            batch_key,
            job_type: request.job_type.clone(),
            worker: request.worker.clone(),
            timeout: request.timeout,
            max_jobs_to_activate: request.max_jobs_to_activate,
            jobs: Vec::new(),
            truncated: false,
        }
    }

    pub fn job_keys(&self) -> Vec<JobKey> {
        self.jobs.iter().map(|entry| entry.key).collect()
    }
}

impl Event for JobBatchActivated {
    fn intent(&self) -> &'static str {
        "ACTIVATED"
    }

    fn value_type(&self) -> ValueType {
        ValueType::JobBatch
    }

    fn key(&self) -> i64 {
        self.batch_key
    }
}
