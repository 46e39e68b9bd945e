//! Strongly-typed record keys used across the partition.
//!
//! Keys are 64-bit integers assigned by a [`KeyGenerator`]; they are unique
//! and monotonically increasing within a partition.

use serde::{Deserialize, Serialize};

/// Key of a job record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(i64);

/// Key of an incident record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentKey(i64);

/// Key of the element instance a job belongs to (owned by process execution).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementInstanceKey(i64);

/// Key of the process instance a job belongs to (owned by process execution).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessInstanceKey(i64);

/// Key of the deployed process definition (owned by deployment).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessDefinitionKey(i64);

macro_rules! impl_key_newtype {
    ($t:ty) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn value(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_key_newtype!(JobKey);
impl_key_newtype!(IncidentKey);
impl_key_newtype!(ElementInstanceKey);
impl_key_newtype!(ProcessInstanceKey);
impl_key_newtype!(ProcessDefinitionKey);

/// Monotonic key source for one partition.
///
/// Keys handed out are never reused. After recovery the generator is moved
/// past every key seen in the replayed log via [`KeyGenerator::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    last: i64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Generator whose first key will be `last + 1`.
    pub fn starting_after(last: i64) -> Self {
        Self { last }
    }

    pub fn next_key<K: From<i64>>(&mut self) -> K {
        self.last += 1;
        K::from(self.last)
    }

    /// Make sure the next key is greater than `key`.
    pub fn observe(&mut self, key: i64) {
        if key > self.last {
            self.last = key;
        }
    }

    pub fn last_key(&self) -> i64 {
        self.last
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
