//! Partition runtime: record log, command pipeline, due-date checkers,
//! lifecycle and the single-threaded partition actor.

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod partition;
pub mod record_log;
pub mod response;
pub mod scheduler;

mod integration_tests;

pub use actor::{PartitionHandle, PartitionStats, spawn};
pub use config::EngineConfig;
pub use engine::{CommandOrigin, CommandOutcome, Collaborators, JobsAvailable, PartitionEngine, Processed};
pub use error::EngineError;
pub use partition::{Partition, PartitionPhase};
pub use record_log::{InMemoryRecordLog, LogError, LoggedRecord, PublishingRecordLog, RecordLog, UncommittedRecord};
pub use response::{CommandResponse, InMemoryResponseWriter, NoopResponseWriter, ResponseWriter};
pub use scheduler::{CheckerState, DueDateChecker, DueDateKind};
