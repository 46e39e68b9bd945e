//! Tracing/logging initialization.
//!
//! Logs go to stderr so stdout stays free for record and response output.
//! `RUST_LOG` sets the filter, `JOBFLOW_LOG_FORMAT` picks `json` (default),
//! `pretty` or `compact`.

use tracing_subscriber::EnvFilter;

pub const FORMAT_VAR: &str = "JOBFLOW_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown names fall back to JSON.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" | "text" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            filter: lookup(EnvFilter::DEFAULT_ENV)
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: lookup(FORMAT_VAR).map(|f| LogFormat::parse(&f)).unwrap_or_default(),
        }
    }
}

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init(settings: LogSettings) {
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = match settings.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_info_json() {
        let settings = LogSettings::from_lookup(|_| None);
        assert_eq!(settings, LogSettings::default());
    }

    #[test]
    fn settings_follow_the_environment() {
        let settings = LogSettings::from_lookup(|name| match name {
            "RUST_LOG" => Some("jobflow_infra=debug".to_string()),
            FORMAT_VAR => Some("Pretty".to_string()),
            _ => None,
        });

        assert_eq!(settings.filter, "jobflow_infra=debug");
        assert_eq!(settings.format, LogFormat::Pretty);
    }

    #[test]
    fn unknown_format_falls_back_to_json() {
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Compact);
    }

    #[test]
    fn init_twice_is_harmless() {
        init(LogSettings::default());
        init(LogSettings::default());
        ::tracing::info!("observability initialized");
    }
}
