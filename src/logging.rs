//! Tracing Infrastructure
//!
//! Structured logging for the CLI and for experiment programs embedding the library.
//! Events carry fields (integration times, temperatures, Pupil timestamps) so a JSON
//! log of a session can be lined up with the recording afterwards.
//!
//! The level and format come from `[application]` in the configuration; `RUST_LOG`,
//! when set, replaces the level filter entirely.
//!
//! # Example
//! ```no_run
//! use rust_plr::{config::PlrConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlrConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!("Application started");
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use crate::config::PlrConfig;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    Pretty,
    /// One line per event, no colors (lab PCs logging to file)
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Include source file and line in each event
    pub with_file_and_line: bool,
    /// ANSI colors; only honored by [`OutputFormat::Pretty`]
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::default(),
            with_file_and_line: false,
            with_ansi: true,
        }
    }

    /// Level and format from `[application]`.
    pub fn from_config(config: &PlrConfig) -> Result<Self, String> {
        let level = parse_log_level(&config.application.log_level)?;
        let format = config.application.log_format.parse()?;
        Ok(Self::new(level).with_format(format))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// `RUST_LOG` if set, else everything at or above the configured level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &PlrConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Does nothing when a subscriber is already installed (test harnesses, embedding
/// programs), so calling it more than once is harmless.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let base = fmt::layer()
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line);
    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(config.filter()))
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {e}"))
}

/// Level name, case-insensitive
fn parse_log_level(level: &str) -> Result<Level, String> {
    Level::from_str(level).map_err(|_| {
        format!("Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("INFO"), Ok(Level::INFO));
        assert_eq!(parse_log_level("Warn"), Ok(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn formats_parse_from_config_strings() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("Pretty".parse::<OutputFormat>(), Ok(OutputFormat::Pretty));
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn tracing_config_follows_application_section() {
        let mut config = PlrConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = "json".to_string();

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Json);
    }

    #[test]
    fn defaults_are_compact_info() {
        let config = TracingConfig::from_config(&PlrConfig::default()).unwrap();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, OutputFormat::Compact);
        assert!(!config.with_file_and_line);
    }
}
