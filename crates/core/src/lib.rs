//! `jobflow-core`: keys, clock, rejections and the decide/apply traits.
//!
//! This crate contains **pure** primitives shared by the job domain and the
//! partition infrastructure (no IO, no threads).

pub mod clock;
pub mod error;
pub mod id;
pub mod processing;

pub use clock::{Clock, ControlledClock, SystemClock};
pub use error::{Rejection, RejectionType};
pub use id::{
    ElementInstanceKey, IncidentKey, JobKey, KeyGenerator, ProcessDefinitionKey,
    ProcessInstanceKey,
};
pub use processing::{CommandProcessor, Decision, EventApplier, execute};
