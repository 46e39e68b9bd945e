//! Partition configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_CHECK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_DUE_DATE_BATCH_LIMIT: usize = 1_000;
pub const DEFAULT_PARTITION_NAME: &str = "partition-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Used as thread name and in log fields.
    pub partition_name: String,
    /// Largest record value the log accepts, in bytes.
    pub max_record_size: usize,
    pub timeout_check_interval_ms: u64,
    pub backoff_check_interval_ms: u64,
    /// Commands a due-date checker may emit per tick.
    pub due_date_batch_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_name: DEFAULT_PARTITION_NAME.to_string(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            timeout_check_interval_ms: DEFAULT_TIMEOUT_CHECK_INTERVAL_MS,
            backoff_check_interval_ms: DEFAULT_BACKOFF_CHECK_INTERVAL_MS,
            due_date_batch_limit: DEFAULT_DUE_DATE_BATCH_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Load from `JOBFLOW_*` environment variables; anything missing or
    /// unparseable keeps its default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            partition_name: lookup("JOBFLOW_PARTITION_NAME")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.partition_name),
            max_record_size: parse_or(&lookup, "JOBFLOW_MAX_RECORD_SIZE", defaults.max_record_size),
            timeout_check_interval_ms: parse_or(
                &lookup,
                "JOBFLOW_TIMEOUT_CHECK_INTERVAL_MS",
                defaults.timeout_check_interval_ms,
            ),
            backoff_check_interval_ms: parse_or(
                &lookup,
                "JOBFLOW_BACKOFF_CHECK_INTERVAL_MS",
                defaults.backoff_check_interval_ms,
            ),
            due_date_batch_limit: parse_or(&lookup, "JOBFLOW_DUE_DATE_BATCH_LIMIT", defaults.due_date_batch_limit),
        }
    }

    pub fn with_partition_name(mut self, name: impl Into<String>) -> Self {
        self.partition_name = name.into();
        self
    }

    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    pub fn with_check_intervals(mut self, timeout: Duration, backoff: Duration) -> Self {
        self.timeout_check_interval_ms = duration_millis(timeout);
        self.backoff_check_interval_ms = duration_millis(backoff);
        self
    }

    pub fn with_due_date_batch_limit(mut self, limit: usize) -> Self {
        self.due_date_batch_limit = limit;
        self
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    pub fn backoff_check_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_check_interval_ms)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + PartialOrd + Default + core::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            tracing::warn!(variable = name, value = %raw, default = %default, "invalid configuration value; using default");
            default
        }
    }
}
