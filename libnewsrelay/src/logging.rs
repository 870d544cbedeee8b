//! Log output setup for the relay binary
//!
//! Diagnostics always go to stderr so stdout stays free for the run summary.
//! The format and level come from command-line flags, falling back to
//! `NEWSRELAY_LOG_FORMAT` / `NEWSRELAY_LOG_LEVEL`; `RUST_LOG` overrides both
//! when set.
//!
//! # Examples
//!
//! ```no_run
//! use libnewsrelay::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "NEWSRELAY_LOG_FORMAT";
pub const ENV_LOG_LEVEL: &str = "NEWSRELAY_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines without colors, suitable for cron mail and journald
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line colored output for interactive use
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "Unknown log format '{}' (expected text, json or pretty)",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Forces `debug` unless `RUST_LOG` says otherwise
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Settings from `NEWSRELAY_LOG_FORMAT` and `NEWSRELAY_LOG_LEVEL`.
    ///
    /// Unparseable values fall back to text at `info`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = lookup(ENV_LOG_FORMAT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = lookup(ENV_LOG_LEVEL)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        Self::new(format, level, false)
    }

    fn filter(&self) -> EnvFilter {
        let fallback = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber.
    ///
    /// A second call is a no-op, which keeps repeated initialization in tests
    /// harmless.
    pub fn init(&self) {
        let filter = self.filter();

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .flatten_event(true)
                .with_current_span(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Logging already initialized, keeping existing subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("Unknown log format 'xml'"));
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let vars: HashMap<&str, &str> =
            [(ENV_LOG_FORMAT, "json"), (ENV_LOG_LEVEL, "warn")].into_iter().collect();
        let config = LoggingConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "warn");
        assert!(!config.verbose);
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = LoggingConfig::from_lookup(|name| match name {
            ENV_LOG_FORMAT => Some("yaml".to_string()),
            ENV_LOG_LEVEL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let config = LoggingConfig::new(LogFormat::Text, "error".to_string(), false);
        config.init();
        config.init();
    }
}
