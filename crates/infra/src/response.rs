//! Responses to client commands.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobflow_core::Rejection;
use jobflow_events::RecordEnvelope;

/// A response sent back for a client command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponse {
    /// The command was accepted; carries its primary event.
    Accepted { event: RecordEnvelope<JsonValue> },
    /// The command was rejected; carries the command record and the reason.
    Rejected {
        command: RecordEnvelope<JsonValue>,
        rejection: Rejection,
    },
}

/// Sink for command responses.
///
/// Only client commands get a response; commands synthesized by the
/// partition itself (timeouts, backoff recurrence) do not.
pub trait ResponseWriter: Send + Sync {
    fn write_event_on_command(&self, event: &RecordEnvelope<JsonValue>);

    fn write_rejection_on_command(&self, command: &RecordEnvelope<JsonValue>, rejection: &Rejection);
}

/// Discards every response.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoopResponseWriter;

impl ResponseWriter for NoopResponseWriter {
    fn write_event_on_command(&self, _event: &RecordEnvelope<JsonValue>) {}

    fn write_rejection_on_command(&self, _command: &RecordEnvelope<JsonValue>, _rejection: &Rejection) {}
}

/// Buffers responses in memory until taken.
#[derive(Debug, Default)]
pub struct InMemoryResponseWriter {
    responses: Mutex<Vec<CommandResponse>>,
}

impl InMemoryResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every buffered response, oldest first.
    pub fn take(&self) -> Vec<CommandResponse> {
        self.responses
            .lock()
            .map(|mut responses| std::mem::take(&mut *responses))
            .unwrap_or_default()
    }

    fn push(&self, response: CommandResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(response);
        }
    }
}

impl ResponseWriter for InMemoryResponseWriter {
    fn write_event_on_command(&self, event: &RecordEnvelope<JsonValue>) {
        self.push(CommandResponse::Accepted { event: event.clone() });
    }

    fn write_rejection_on_command(&self, command: &RecordEnvelope<JsonValue>, rejection: &Rejection) {
        self.push(CommandResponse::Rejected {
            command: command.clone(),
            rejection: rejection.clone(),
        });
    }
}
