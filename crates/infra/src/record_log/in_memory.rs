use std::sync::RwLock;

use super::record::{LogError, LoggedRecord, UncommittedRecord};
use super::RecordLog;

#[derive(Debug, Default)]
struct LogInner {
    records: Vec<LoggedRecord>,
    closed: bool,
}

/// In-memory append-only record log.
///
/// Intended for tests and the single-node runtime. Not optimized for
/// performance.
#[derive(Debug)]
pub struct InMemoryRecordLog {
    inner: RwLock<LogInner>,
    max_record_size: usize,
}

impl InMemoryRecordLog {
    pub fn new(max_record_size: usize) -> Self {
        Self {
            inner: RwLock::new(LogInner::default()),
            max_record_size,
        }
    }

    /// Refuse every further append, like a storage device that went away.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.closed = true;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordLog for InMemoryRecordLog {
    fn append(&self, records: Vec<UncommittedRecord>) -> Result<Vec<LoggedRecord>, LogError> {
        if records.is_empty() {
            return Ok(vec![]);
        }

        // Validate the whole batch before touching the log (all or nothing).
        for record in &records {
            let size = record.value_length();
            if size > self.max_record_size {
                return Err(LogError::RecordTooLarge {
                    size,
                    max: self.max_record_size,
                });
            }
        }

        let mut inner = self.inner.write().map_err(|_| LogError::Poisoned)?;
        if inner.closed {
            return Err(LogError::Closed);
        }

        let mut next = inner.records.last().map(|r| r.position).unwrap_or(0) + 1;
        let first_position = next;
        let caused_by_command = records[0].record_type == jobflow_events::RecordType::Command;

        let mut committed = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let source_position = (caused_by_command && idx > 0).then_some(first_position);
            let logged = LoggedRecord {
                record_id: record.record_id,
                position: next,
                source_position,
                key: record.key,
                timestamp: record.timestamp,
                record_type: record.record_type,
                value_type: record.value_type,
                intent: record.intent,
                rejection: record.rejection,
                value: record.value,
            };
            next += 1;
            inner.records.push(logged.clone());
            committed.push(logged);
        }

        Ok(committed)
    }

    fn read_all(&self) -> Result<Vec<LoggedRecord>, LogError> {
        let inner = self.inner.read().map_err(|_| LogError::Poisoned)?;
        Ok(inner.records.clone())
    }

    fn max_record_size(&self) -> usize {
        self.max_record_size
    }
}
