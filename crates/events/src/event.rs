use crate::ValueType;

/// A fact that was accepted by a processor.
///
/// Events are:
/// - **immutable** (appended, never rewritten)
/// - **versioned** (schema evolution)
/// - the only input of recovery
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable intent name in past tense, e.g. `"COMPLETED"`.
    fn intent(&self) -> &'static str;

    fn value_type(&self) -> ValueType;

    /// Key of the entity the event is about.
    fn key(&self) -> i64;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }
}
