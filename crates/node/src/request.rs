//! Request and output lines.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobflow_core::{ElementInstanceKey, ProcessDefinitionKey, ProcessInstanceKey};
use jobflow_events::RecordEnvelope;
use jobflow_infra::{CommandOutcome, PartitionStats};
use jobflow_jobs::{JobRecord, PartitionCommand, Variables};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    /// Create a job as process execution would.
    Create { job: NewJob },
    Command { command: PartitionCommand },
    SetVariable {
        scope: ElementInstanceKey,
        name: String,
        value: JsonValue,
    },
    #[serde(rename_all = "camelCase")]
    RegisterCatch {
        element_instance_key: ElementInstanceKey,
        error_code: String,
        catch_element_id: String,
        scope_key: ElementInstanceKey,
        #[serde(default = "yes")]
        scope_active: bool,
        #[serde(default = "yes")]
        accepting_events: bool,
    },
    /// Run the due-date checkers now.
    Tick,
    Pause,
    Resume,
    Stats,
}

fn yes() -> bool {
    true
}

/// Job as handed over by process execution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: String,
    pub retries: i32,
    pub element_instance_key: ElementInstanceKey,
    #[serde(default)]
    pub process_instance_key: Option<ProcessInstanceKey>,
    #[serde(default)]
    pub process_definition_key: Option<ProcessDefinitionKey>,
    #[serde(default)]
    pub bpmn_process_id: String,
    #[serde(default)]
    pub element_id: String,
    #[serde(default)]
    pub custom_headers: Variables,
}

impl NewJob {
    pub fn into_record(self) -> JobRecord {
        let mut record = JobRecord::new(self.job_type, self.retries, self.element_instance_key).with_process(
            self.process_instance_key.unwrap_or(ProcessInstanceKey::new(0)),
            self.process_definition_key.unwrap_or(ProcessDefinitionKey::new(0)),
            self.bpmn_process_id,
            self.element_id,
        );
        record.custom_headers = self.custom_headers;
        record
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "output", rename_all = "camelCase")]
pub enum Output {
    Outcome { outcome: CommandOutcome },
    Checked { emitted: usize },
    Done,
    Stats { stats: PartitionStats },
    #[serde(rename_all = "camelCase")]
    JobsAvailable { job_type: String },
    Record { record: RecordEnvelope<JsonValue> },
    Error { message: String },
}

impl From<CommandOutcome> for Output {
    fn from(outcome: CommandOutcome) -> Self {
        Output::Outcome { outcome }
    }
}
