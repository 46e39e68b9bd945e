use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use jobflow_core::Rejection;
use jobflow_events::{Command, Event, RecordEnvelope, RecordType, ValueType};

/// Key written on records that do not address a single entity.
pub const NO_KEY: i64 = -1;

/// A record ready to be appended (not yet assigned a position).
///
/// Built from typed commands and events through the `from_*` constructors,
/// which serialize the payload to JSON and capture intent and value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedRecord {
    pub record_id: Uuid,
    pub key: i64,
    pub timestamp: i64,
    pub record_type: RecordType,
    pub value_type: ValueType,
    pub intent: String,
    pub rejection: Option<Rejection>,
    pub value: JsonValue,
}

/// A record in the partition log (assigned a position).
///
/// Positions are strictly increasing and never reused. `source_position`
/// points at the command record a follow-up record was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedRecord {
    pub record_id: Uuid,
    pub position: u64,
    pub source_position: Option<u64>,
    pub key: i64,
    pub timestamp: i64,
    pub record_type: RecordType,
    pub value_type: ValueType,
    pub intent: String,
    pub rejection: Option<Rejection>,
    pub value: JsonValue,
}

impl LoggedRecord {
    /// Convert a logged record into an envelope for publication and replay.
    pub fn to_envelope(&self) -> RecordEnvelope<JsonValue> {
        RecordEnvelope::new(
            self.record_id,
            self.position,
            self.source_position,
            self.key,
            self.timestamp,
            self.record_type,
            self.value_type,
            self.intent.clone(),
            self.rejection.clone(),
            self.value.clone(),
        )
    }
}

/// Record log operation error.
///
/// These are storage failures, as opposed to command rejections. Fatal ones
/// stop command processing on the partition; a refused oversized append
/// leaves the log untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("record of {size} bytes exceeds the maximum record size of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("record log is closed")]
    Closed,

    #[error("record log lock poisoned")]
    Poisoned,

    #[error("record serialization failed: {0}")]
    Serialize(String),
}

impl LogError {
    /// Storage failures; the log can no longer be trusted with appends.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LogError::Closed | LogError::Poisoned)
    }
}

impl UncommittedRecord {
    fn build(
        key: i64,
        timestamp: i64,
        record_type: RecordType,
        value_type: ValueType,
        intent: &str,
        rejection: Option<Rejection>,
        value: JsonValue,
    ) -> Self {
        Self {
            record_id: Uuid::now_v7(),
            key,
            timestamp,
            record_type,
            value_type,
            intent: intent.to_string(),
            rejection,
            value,
        }
    }

    /// Command record, as received by the partition.
    pub fn from_command<C>(command: &C, timestamp: i64) -> Result<Self, LogError>
    where
        C: Command + Serialize,
    {
        let value = serde_json::to_value(command).map_err(|e| LogError::Serialize(e.to_string()))?;
        Ok(Self::build(
            command.target_key().unwrap_or(NO_KEY),
            timestamp,
            RecordType::Command,
            command.value_type(),
            command.intent(),
            None,
            value,
        ))
    }

    /// Event record.
    pub fn from_event<E>(event: &E, timestamp: i64) -> Result<Self, LogError>
    where
        E: Event + Serialize,
    {
        let value = serde_json::to_value(event).map_err(|e| LogError::Serialize(e.to_string()))?;
        Ok(Self::build(
            event.key(),
            timestamp,
            RecordType::Event,
            event.value_type(),
            event.intent(),
            None,
            value,
        ))
    }

    /// Rejection record for `command`; carries the rejected command as value.
    pub fn rejection_of<C>(command: &C, rejection: Rejection, timestamp: i64) -> Result<Self, LogError>
    where
        C: Command + Serialize,
    {
        let value = serde_json::to_value(command).map_err(|e| LogError::Serialize(e.to_string()))?;
        Ok(Self::build(
            command.target_key().unwrap_or(NO_KEY),
            timestamp,
            RecordType::CommandRejection,
            command.value_type(),
            command.intent(),
            Some(rejection),
            value,
        ))
    }

    /// Serialized size of the record value.
    pub fn value_length(&self) -> usize {
        serde_json::to_vec(&self.value).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}
