use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobflow_core::Rejection;

/// Kind of a logged record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

/// Entity family a record belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Job,
    JobBatch,
    Incident,
    /// Commands addressed to the process-execution state machine.
    ProcessInstance,
}

/// A record as it is published after being appended to the partition log.
///
/// Notes:
/// - `position` is strictly increasing within one partition log.
/// - `source_position` links follow-up records to the command that caused them.
/// - `value` is the payload (typed or JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnvelope<V> {
    record_id: Uuid,
    position: u64,
    source_position: Option<u64>,

    key: i64,
    timestamp: i64,
    record_type: RecordType,
    value_type: ValueType,
    intent: String,
    rejection: Option<Rejection>,

    value: V,
}

impl<V> RecordEnvelope<V> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        record_id: Uuid,
        position: u64,
        source_position: Option<u64>,
        key: i64,
        timestamp: i64,
        record_type: RecordType,
        value_type: ValueType,
        intent: impl Into<String>,
        rejection: Option<Rejection>,
        value: V,
    ) -> Self {
        Self {
            record_id,
            position,
            source_position,
            key,
            timestamp,
            record_type,
            value_type,
            intent: intent.into(),
            rejection,
            value,
        }
    }

    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn source_position(&self) -> Option<u64> {
        self.source_position
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    pub fn is_event(&self) -> bool {
        self.record_type == RecordType::Event
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}
