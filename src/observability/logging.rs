//! Structured logging using the tracing crate
//!
//! ## Log Format Options
//!
//! The output format is chosen by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON for log aggregation
//! - `pretty` - Multi-line, coloured output for development
//! - `compact` - Single-line, coloured terminal output
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE - defaults to INFO
//! - `LOG_FORMAT`: json, pretty or compact - defaults to json
//! - `LOG_SPANS`: emit span open/close events (true/false) - defaults to false
//! - `RUST_LOG`: replaces the whole filter (env_logger syntax)
//!
//! ## Examples
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=INFO carlink run
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG carlink run
//! RUST_LOG=carlink=trace,lapin=debug carlink run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are chatty at INFO and below
const QUIET_DEPENDENCIES: [&str; 4] = ["lapin", "amq_protocol", "hyper", "reqwest"];

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse a format name; unknown names fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name; unknown names fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Logging settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Full filter override from `RUST_LOG`
    pub filter_override: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_spans: false,
            filter_override: None,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: lookup("LOG_LEVEL")
                .map(|value| parse_level(&value))
                .unwrap_or(Level::INFO),
            format: lookup("LOG_FORMAT")
                .map(|value| LogFormat::parse(&value))
                .unwrap_or(LogFormat::Json),
            include_spans: lookup("LOG_SPANS")
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
            filter_override: lookup("RUST_LOG").filter(|value| !value.trim().is_empty()),
        }
    }

    /// Filter directives: the override verbatim, or the level with dependencies quietened
    pub fn filter_directives(&self) -> String {
        if let Some(filter) = &self.filter_override {
            return filter.clone();
        }

        let mut directives = vec![self.level.to_string().to_lowercase()];
        directives.extend(
            QUIET_DEPENDENCIES
                .iter()
                .map(|target| format!("{target}=warn")),
        );
        directives.join(",")
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.filter_directives())
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<(), TryInitError> {
    let subscriber = tracing_subscriber::registry().with(settings.build_filter());

    match settings.format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(settings.span_events()))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> Result<(), TryInitError> {
    init_logging(&LogSettings::from_env())
}

/// Span around one broker operation
#[macro_export]
macro_rules! broker_span {
    ($($field:tt)*) => {
        tracing::info_span!("broker_operation", $($field)*)
    };
}

/// Span around the telemetry simulation
#[macro_export]
macro_rules! simulation_span {
    ($($field:tt)*) => {
        tracing::info_span!("simulation", $($field)*)
    };
}

pub use {broker_span, simulation_span};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        LogSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("debug", Level::DEBUG),
            ("TRACE", Level::TRACE),
            ("verbose", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_settings_defaults_without_env() {
        assert_eq!(settings_from(&[]), LogSettings::default());
    }

    #[test]
    fn test_settings_from_env_values() {
        let settings = settings_from(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "compact"),
            ("LOG_SPANS", "TRUE"),
        ]);
        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(settings.include_spans);

        assert!(!settings_from(&[("LOG_SPANS", "yes")]).include_spans);
    }

    #[test]
    fn test_filter_quietens_dependencies() {
        let directives = settings_from(&[("LOG_LEVEL", "DEBUG")]).filter_directives();
        assert!(directives.starts_with("debug"));
        for target in QUIET_DEPENDENCIES {
            assert!(directives.contains(&format!("{target}=warn")));
        }
    }

    #[test]
    fn test_rust_log_overrides_filter() {
        let settings = settings_from(&[("LOG_LEVEL", "ERROR"), ("RUST_LOG", "carlink=trace")]);
        assert_eq!(settings.filter_directives(), "carlink=trace");

        let blank = settings_from(&[("RUST_LOG", "  ")]);
        assert_eq!(blank.filter_override, None);
    }
}
