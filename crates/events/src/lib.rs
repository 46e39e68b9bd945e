//! Record model, command/event contracts, replay and pub/sub mechanics.

mod command;
mod envelope;
mod event;

pub mod bus;
pub mod in_memory_bus;
pub mod runner;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::{RecordEnvelope, RecordType, ValueType};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use runner::{ReplayCursor, ReplayError, ReplayRunner};
