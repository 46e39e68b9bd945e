//! Replay utilities (state recovery from the record log).
//!
//! Partition state is **derived**; the log is the source of truth. Recovery
//! applies event records in log order and ignores commands and rejections, so
//! an effect whose command was accepted before a crash is never applied twice.

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use jobflow_core::EventApplier;

use crate::RecordEnvelope;

/// Tracks replay progress.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReplayCursor {
    last_position: u64,
    last_key: i64,
    events_applied: u64,
}

impl ReplayCursor {
    pub fn last_position(&self) -> u64 {
        self.last_position
    }

    /// Highest record key seen; the key generator continues after it.
    pub fn last_key(&self) -> i64 {
        self.last_key
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("non-monotonic record position (last={last}, found={found})")]
    NonMonotonicPosition { last: u64, found: u64 },
    #[error("failed to decode event at position {position}: {message}")]
    Decode { position: u64, message: String },
}

/// Runs logged records through an [`EventApplier`] and tracks progress.
#[derive(Debug)]
pub struct ReplayRunner<S>
where
    S: EventApplier,
{
    state: S,
    cursor: ReplayCursor,
}

impl<S> ReplayRunner<S>
where
    S: EventApplier,
    S::Event: DeserializeOwned,
{
    pub fn new(state: S) -> Self {
        Self {
            state,
            cursor: ReplayCursor::default(),
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn cursor(&self) -> ReplayCursor {
        self.cursor
    }

    pub fn into_parts(self) -> (S, ReplayCursor) {
        (self.state, self.cursor)
    }

    /// Apply a single record, enforcing strictly increasing positions.
    ///
    /// Non-event records only advance the cursor position; their keys are
    /// client-supplied and never seed the key generator.
    pub fn apply(&mut self, record: &RecordEnvelope<JsonValue>) -> Result<(), ReplayError> {
        let position = record.position();
        if self.cursor.last_position != 0 && position <= self.cursor.last_position {
            return Err(ReplayError::NonMonotonicPosition {
                last: self.cursor.last_position,
                found: position,
            });
        }

        if record.is_event() {
            let event: S::Event = serde_json::from_value(record.value().clone()).map_err(|e| {
                ReplayError::Decode {
                    position,
                    message: e.to_string(),
                }
            })?;
            self.state.apply(&event);
            self.cursor.events_applied += 1;
            self.cursor.last_key = self.cursor.last_key.max(record.key());
        }

        self.cursor.last_position = position;
        Ok(())
    }

    /// Apply many records in order.
    pub fn run<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a RecordEnvelope<JsonValue>>,
    ) -> Result<(), ReplayError> {
        for record in records {
            self.apply(record)?;
        }
        Ok(())
    }

    /// Rebuild a state from scratch by replaying the full log.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> S,
        records: impl IntoIterator<Item = &'a RecordEnvelope<JsonValue>>,
    ) -> Result<(S, ReplayCursor), ReplayError> {
        let mut runner = ReplayRunner::new(factory());
        runner.run(records)?;
        Ok(runner.into_parts())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::*;
    use crate::{RecordType, ValueType};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Added(i64);

    #[derive(Debug, Default)]
    struct Sum(i64);

    impl EventApplier for Sum {
        type Event = Added;

        fn apply(&mut self, event: &Added) {
            self.0 += event.0;
        }
    }

    fn record(position: u64, record_type: RecordType, amount: i64) -> RecordEnvelope<JsonValue> {
        keyed(position, position as i64, record_type, amount)
    }

    fn keyed(position: u64, key: i64, record_type: RecordType, amount: i64) -> RecordEnvelope<JsonValue> {
        RecordEnvelope::new(
            Uuid::now_v7(),
            position,
            None,
            key,
            0,
            record_type,
            ValueType::Job,
            "ADDED",
            None,
            serde_json::to_value(Added(amount)).unwrap(),
        )
    }

    #[test]
    fn only_events_are_applied() {
        let records = vec![
            record(1, RecordType::Command, 100),
            record(2, RecordType::Event, 1),
            record(3, RecordType::CommandRejection, 100),
            record(4, RecordType::Event, 2),
        ];

        let (sum, cursor) = ReplayRunner::rebuild_from_scratch(Sum::default, &records).unwrap();

        assert_eq!(sum.0, 3);
        assert_eq!(cursor.events_applied(), 2);
        assert_eq!(cursor.last_position(), 4);
        assert_eq!(cursor.last_key(), 4);
    }

    #[test]
    fn command_and_rejection_keys_do_not_raise_the_last_key() {
        let records = vec![
            record(1, RecordType::Event, 1),
            keyed(2, i64::MAX, RecordType::Command, 0),
            keyed(3, i64::MAX, RecordType::CommandRejection, 0),
            record(4, RecordType::Event, 1),
        ];

        let (_, cursor) = ReplayRunner::rebuild_from_scratch(Sum::default, &records).unwrap();

        assert_eq!(cursor.last_key(), 4);
        assert_eq!(cursor.last_position(), 4);
    }

    #[test]
    fn out_of_order_positions_are_rejected() {
        let mut runner = ReplayRunner::new(Sum::default());
        runner.apply(&record(5, RecordType::Event, 1)).unwrap();

        let err = runner.apply(&record(5, RecordType::Event, 1)).unwrap_err();
        assert_eq!(err, ReplayError::NonMonotonicPosition { last: 5, found: 5 });
        assert_eq!(runner.state().0, 1);
    }
}
