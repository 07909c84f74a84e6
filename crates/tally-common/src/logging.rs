//! Subscriber setup for the `tally` binary and tests.
//!
//! Library crates only emit `tracing` events; installing a subscriber is left
//! to the process entry point.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::ConfigError;

/// Selects the output format (`pretty`, `compact` or `json`).
pub const LOG_FORMAT_ENV: &str = "TALLY_LOG_FORMAT";

/// Crates whose events pass the default filter at the configured level.
const TALLY_TARGETS: [&str; 4] = ["tally", "tally_common", "tally_data", "tally_idb"];

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for terminals.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!("unknown log format: {}", other))),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Level for the Tally crates; dependencies stay at `warn`.
    pub level: Level,
    pub format: LogFormat,
    /// Print file and line of each event.
    pub source_location: bool,
    /// Log when transaction and seeding spans open and close.
    pub span_events: bool,
    /// Full `EnvFilter` directive string, replacing the defaults and
    /// `RUST_LOG`.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            source_location: false,
            span_events: false,
            directives: None,
        }
    }
}

impl LogConfig {
    /// Settings for the CLI: `verbose` turns on debug events with source
    /// locations; otherwise the format may come from `TALLY_LOG_FORMAT`.
    pub fn for_cli(verbose: bool) -> Result<Self, ConfigError> {
        let mut config = if verbose {
            Self {
                level: Level::DEBUG,
                source_location: true,
                span_events: true,
                ..Default::default()
            }
        } else {
            Self::default()
        };
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    /// `warn` globally, `level` for the Tally crates.
    fn default_directives(&self) -> String {
        let level = self.level.to_string().to_ascii_lowercase();
        std::iter::once("warn".to_string())
            .chain(TALLY_TARGETS.iter().map(|t| format!("{}={}", t, level)))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if let Some(directives) = &self.directives {
            return EnvFilter::try_new(directives)
                .map_err(|e| ConfigError::Invalid(format!("log directives {:?}: {}", directives, e)));
        }
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(self.default_directives())
                .map_err(|e| ConfigError::Logging(e.to_string())),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), ConfigError> {
    let filter = config.env_filter()?;
    let spans = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location)
                    .with_span_events(spans),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_span_events(spans))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false).with_span_events(spans))
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let quiet = LogConfig::for_cli(false).unwrap();
        assert_eq!(quiet.level, Level::INFO);
        assert!(!quiet.source_location);

        let verbose = LogConfig::for_cli(true).unwrap();
        assert_eq!(verbose.level, Level::DEBUG);
        assert!(verbose.span_events);
    }

    #[test]
    fn test_default_directives_cover_tally_crates() {
        let directives = LogConfig::default().default_directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("tally_data=info"));
        assert!(directives.contains("tally_idb=info"));
    }

    #[test]
    fn test_bad_directives_rejected() {
        let config = LogConfig::default().with_directives("tally_data=loud");
        assert!(matches!(config.env_filter(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
