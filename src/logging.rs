use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log directive {directive:?}: {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("Failed to build filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },
    #[error("Failed to install global subscriber: {0}")]
    Install(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Extra `target=level` directives layered over the defaults.
    pub directives: Vec<String>,
}

/// A single `target=level` filter directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    target: String,
    level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, LoggingError> {
        let invalid = |reason: &str| LoggingError::InvalidDirective {
            directive: directive.to_string(),
            reason: reason.to_string(),
        };

        let (target, level) = directive
            .split_once('=')
            .ok_or_else(|| invalid("expected target=level"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(invalid("empty target"));
        }
        let level = level.parse::<LogLevel>().map_err(|e| invalid(&e))?;
        Ok(Self::new(target, level))
    }
}

impl fmt::Display for LogDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.target, self.level.as_str())
    }
}

/// Builds the `EnvFilter` for the process and installs the fmt subscriber.
pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let parsed = LogDirective::parse(directive)?;
        self.directives.write().push(parsed);
        Ok(())
    }

    /// Quiet the HTTP stack, which is very chatty at debug.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["hyper", "reqwest", "h2"] {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().map(ToString::to_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn build_filter(&self, default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
        let filter = self.build_filter_string(default_level);
        EnvFilter::try_new(&filter).map_err(|e| LoggingError::Filter {
            filter,
            reason: e.to_string(),
        })
    }

    pub fn initialize(&self, level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
        let filter = self.build_filter(level)?;
        let registry = tracing_subscriber::registry().with(filter);

        let installed = match format {
            LogFormat::Compact => registry
                .with(
                    tracing_fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(tracing_fmt::layer().with_target(true).json())
                .try_init(),
        };
        installed.map_err(|e| LoggingError::Install(e.to_string()))
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Install logging from config: defaults first, then user directives.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let system = LoggingSystem::new();
    system.add_default_directives();
    for directive in &config.directives {
        system.add_directive(directive)?;
    }
    system.initialize(config.level, config.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directives() {
        let d = LogDirective::parse("dataway_writer=debug").unwrap();
        assert_eq!(d.to_string(), "dataway_writer=debug");

        assert!(LogDirective::parse("nolevel").is_err());
        assert!(LogDirective::parse("=info").is_err());
        assert!(LogDirective::parse("x=loud").is_err());
    }

    #[test]
    fn filter_string_starts_with_default_level() {
        let system = LoggingSystem::new();
        assert_eq!(system.build_filter_string(LogLevel::Info), "info");

        system.add_default_directives();
        system.add_directive("dataway_writer::sender=trace").unwrap();
        let filter = system.build_filter_string(LogLevel::Debug);

        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("dataway_writer::sender=trace"));
        assert_eq!(system.directive_count(), 4);
        assert!(system.build_filter(LogLevel::Debug).is_ok());
    }

    #[test]
    fn level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
    }

    #[test]
    fn second_initialization_reports_error() {
        let config = LoggingConfig::default();
        // another test binary may already own the global subscriber
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::Install(_))
        ));
    }
}
