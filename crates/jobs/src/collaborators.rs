//! Read-only views the job processor needs from the rest of the engine.
//!
//! Variables and element instances are owned by process execution; the log
//! writer owns the record size limit. The in-memory implementations back tests
//! and the single-node runtime.

use std::collections::HashMap;
use std::sync::RwLock;

use jobflow_core::ElementInstanceKey;

use crate::job::Variables;

/// Resolves variables visible from an element instance scope.
pub trait VariableStore: Send + Sync {
    /// Variables visible from `scope`, restricted to `names` unless empty.
    fn resolve_variables(&self, scope: ElementInstanceKey, names: &[String]) -> Variables;
}

/// Catch event a thrown error code resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCatchTarget {
    pub catch_element_id: String,
    /// Element instance that hosts the catch event.
    pub scope_key: ElementInstanceKey,
    /// Whether the hosting scope is still active.
    pub scope_active: bool,
    /// Whether the hosting scope currently accepts events.
    pub accepting_events: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchEventLookup {
    NotFound,
    Found(ErrorCatchTarget),
}

/// Process-execution state needed to route thrown errors.
pub trait ProcessState: Send + Sync {
    fn find_error_catch_event(&self, element_instance_key: ElementInstanceKey, error_code: &str) -> CatchEventLookup;
}

/// Record size check of the log writer.
pub trait WriteBudget: Send + Sync {
    fn can_write_event_of_length(&self, length: usize) -> bool;
}

/// Fixed upper bound on a single record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaxRecordSize(pub usize);

impl WriteBudget for MaxRecordSize {
    fn can_write_event_of_length(&self, length: usize) -> bool {
        length <= self.0
    }
}

/// In-memory variable scopes.
///
/// - No scope hierarchy: each element instance sees its own document
/// - Poisoned locks read as empty scopes
#[derive(Debug, Default)]
pub struct InMemoryVariables {
    scopes: RwLock<HashMap<ElementInstanceKey, Variables>>,
}

impl InMemoryVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: ElementInstanceKey, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        if let Ok(mut scopes) = self.scopes.write() {
            scopes.entry(scope).or_default().insert(name.into(), value.into());
        }
    }
}

impl VariableStore for InMemoryVariables {
    fn resolve_variables(&self, scope: ElementInstanceKey, names: &[String]) -> Variables {
        let Ok(scopes) = self.scopes.read() else {
            return Variables::new();
        };
        let Some(document) = scopes.get(&scope) else {
            return Variables::new();
        };

        if names.is_empty() {
            return document.clone();
        }

        names
            .iter()
            .filter_map(|name| document.get(name).map(|value| (name.clone(), value.clone())))
            .collect()
    }
}

/// In-memory registry of error catch events, keyed by throwing element and code.
#[derive(Debug, Default)]
pub struct InMemoryProcessState {
    catches: RwLock<HashMap<(ElementInstanceKey, String), ErrorCatchTarget>>,
}

impl InMemoryProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_catch(
        &self,
        element_instance_key: ElementInstanceKey,
        error_code: impl Into<String>,
        target: ErrorCatchTarget,
    ) {
        if let Ok(mut catches) = self.catches.write() {
            catches.insert((element_instance_key, error_code.into()), target);
        }
    }
}

impl ProcessState for InMemoryProcessState {
    fn find_error_catch_event(&self, element_instance_key: ElementInstanceKey, error_code: &str) -> CatchEventLookup {
        let Ok(catches) = self.catches.read() else {
            return CatchEventLookup::NotFound;
        };
        match catches.get(&(element_instance_key, error_code.to_string())) {
            Some(target) => CatchEventLookup::Found(target.clone()),
            None => CatchEventLookup::NotFound,
        }
    }
}
