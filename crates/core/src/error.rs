//! Command rejection model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a command rejection.
///
/// Keep this focused on deterministic precondition failures. Infrastructure
/// failures (log full, poisoned state) belong to the infra layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    /// The addressed entity (job, incident, catch target) does not exist.
    NotFound,
    /// The entity exists but its lifecycle state forbids the command.
    InvalidState,
    /// The command itself is malformed.
    InvalidArgument,
}

impl core::fmt::Display for RejectionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            RejectionType::NotFound => "NOT_FOUND",
            RejectionType::InvalidState => "INVALID_STATE",
            RejectionType::InvalidArgument => "INVALID_ARGUMENT",
        };
        f.write_str(name)
    }
}

/// A rejected command: category plus a human-readable reason.
///
/// The reason text is written to the rejection record and echoed to the
/// response writer unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{rejection_type}: {reason}")]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::NotFound, reason)
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidState, reason)
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidArgument, reason)
    }
}
