use crate::ValueType;

/// A request to change partition state.
///
/// Commands are **intent**: they are validated against the current state and
/// either rejected (no state change, one rejection record) or accepted and
/// turned into events. Only events are replayed on recovery.
///
/// Commands must own all their data so they can be queued by schedulers,
/// written to the log and sent across the actor mailbox.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable intent name, e.g. `"COMPLETE"`.
    fn intent(&self) -> &'static str;

    fn value_type(&self) -> ValueType;

    /// Key of the addressed entity, or `None` for commands that address a
    /// whole type (e.g. batch activation).
    fn target_key(&self) -> Option<i64>;
}
