use thiserror::Error;

use jobflow_events::ReplayError;

use crate::partition::PartitionPhase;
use crate::record_log::LogError;

/// Partition runtime error.
///
/// Command rejections are not errors here; they are regular outcomes. These
/// variants mean the partition could not process a command at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("record log failure: {0}")]
    Log(#[from] LogError),

    #[error("recovery failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("partition is {phase} and does not accept commands")]
    NotAccepting { phase: PartitionPhase },

    #[error("partition cannot move from {from} to {to}")]
    InvalidTransition { from: PartitionPhase, to: PartitionPhase },

    #[error("partition actor is gone")]
    ActorGone,

    #[error("failed to spawn partition actor: {0}")]
    Spawn(String),
}
