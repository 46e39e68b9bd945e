//! Decide/apply processing traits for event-sourced partition state.

/// State that evolves only by applying accepted events.
///
/// Implementations must stay deterministic: replaying the same events from an
/// empty state must rebuild the same state. Applying is never allowed to fail;
/// anything that can fail belongs in command validation.
pub trait EventApplier {
    type Event: Clone + core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);
}

/// Outcome of an accepted command.
///
/// - `events` are appended to the log and then applied to the state, in order.
///   The first event is the primary follow-up event of the command.
/// - `follow_ups` are commands addressed to other processors; they are written
///   after the events and never applied here.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<E, F = ()> {
    pub events: Vec<E>,
    pub follow_ups: Vec<F>,
}

impl<E, F> Decision<E, F> {
    pub fn new(primary: E) -> Self {
        Self {
            events: vec![primary],
            follow_ups: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: E) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn with_follow_up(mut self, command: F) -> Self {
        self.follow_ups.push(command);
        self
    }

    pub fn primary(&self) -> Option<&E> {
        self.events.first()
    }
}

/// Command handling against a read-only view of the state.
///
/// **Decision logic only**: `handle` must not mutate `state`. State evolution is
/// done by the caller through [`EventApplier::apply`] once the events are
/// durable.
pub trait CommandProcessor {
    type State: EventApplier;
    type Command: Clone + core::fmt::Debug;
    type FollowUp: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn handle(
        &mut self,
        state: &Self::State,
        command: &Self::Command,
    ) -> Result<Decision<<Self::State as EventApplier>::Event, Self::FollowUp>, Self::Error>;
}

/// Execute a command deterministically (no IO, no log).
///
/// 1. **Decide**: `processor.handle(state, command)` (pure with respect to state)
/// 2. **Evolve**: applies each decided event to the state
///
/// Useful for domain tests. The partition engine runs the same steps with an
/// append to the record log in between.
pub fn execute<P>(
    processor: &mut P,
    state: &mut P::State,
    command: &P::Command,
) -> Result<Decision<<P::State as EventApplier>::Event, P::FollowUp>, P::Error>
where
    P: CommandProcessor,
{
    let decision = processor.handle(state, command)?;
    for event in &decision.events {
        state.apply(event);
    }
    Ok(decision)
}
