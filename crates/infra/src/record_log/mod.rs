//! Append-only partition record log.
//!
//! The log is the source of truth of a partition: commands, the events they
//! produced, follow-up commands and rejections are appended in one batch, and
//! recovery replays the event records.

pub mod in_memory;
pub mod record;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use jobflow_events::{EventBus, RecordEnvelope};

pub use in_memory::InMemoryRecordLog;
pub use record::{LogError, LoggedRecord, NO_KEY, UncommittedRecord};

/// Append-only record log of one partition.
///
/// `append` semantics:
/// - assigns strictly increasing positions, continuing after the last record
/// - when the first record of a batch is a command, every following record of
///   the batch gets its position as `source_position`
/// - persists the batch atomically (all or nothing)
pub trait RecordLog: Send + Sync {
    fn append(&self, records: Vec<UncommittedRecord>) -> Result<Vec<LoggedRecord>, LogError>;

    /// All records in position order.
    fn read_all(&self) -> Result<Vec<LoggedRecord>, LogError>;

    /// Largest record value the log accepts, in bytes.
    fn max_record_size(&self) -> usize;

    fn can_write_event_of_length(&self, length: usize) -> bool {
        length <= self.max_record_size()
    }
}

impl<L> RecordLog for Arc<L>
where
    L: RecordLog + ?Sized,
{
    fn append(&self, records: Vec<UncommittedRecord>) -> Result<Vec<LoggedRecord>, LogError> {
        (**self).append(records)
    }

    fn read_all(&self) -> Result<Vec<LoggedRecord>, LogError> {
        (**self).read_all()
    }

    fn max_record_size(&self) -> usize {
        (**self).max_record_size()
    }
}

/// Adapter that publishes committed records to an [`EventBus`] after a
/// successful append.
///
/// Publication only happens once the append succeeded. A failed publish is
/// logged and does not undo the append; the log stays authoritative.
pub struct PublishingRecordLog<L, B> {
    log: L,
    bus: B,
}

impl<L, B> PublishingRecordLog<L, B> {
    pub fn new(log: L, bus: B) -> Self {
        Self { log, bus }
    }

    pub fn into_parts(self) -> (L, B) {
        (self.log, self.bus)
    }
}

impl<L, B> RecordLog for PublishingRecordLog<L, B>
where
    L: RecordLog,
    B: EventBus<RecordEnvelope<JsonValue>>,
{
    fn append(&self, records: Vec<UncommittedRecord>) -> Result<Vec<LoggedRecord>, LogError> {
        let committed = self.log.append(records)?;

        for record in &committed {
            if let Err(err) = self.bus.publish(record.to_envelope()) {
                warn!(position = record.position, error = ?err, "failed to export record");
            }
        }

        Ok(committed)
    }

    fn read_all(&self) -> Result<Vec<LoggedRecord>, LogError> {
        self.log.read_all()
    }

    fn max_record_size(&self) -> usize {
        self.log.max_record_size()
    }
}
