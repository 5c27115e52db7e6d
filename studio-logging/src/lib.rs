//! Tracing initialization for the studio tools.
//!
//! Output is driven by environment variables so the CLI and the presign
//! endpoint can share one setup:
//!
//! - `RUST_LOG` / `LOG_LEVEL` - filter directives (`RUST_LOG` wins)
//! - `LOG_OUTPUT` - `console`, `file`, `both` or `none`
//! - `LOG_FORMAT` - `human`, `compact` or `json`
//! - `LOG_FILE_PATH` - file used when `LOG_OUTPUT` includes `file`

use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "/tmp/studio-cli.log";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    Disabled,
}

impl LogOutput {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            "none" | "off" => LogOutput::Disabled,
            _ => LogOutput::Console,
        }
    }

    fn to_console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn to_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Human,
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LEVEL.to_string(),
            output: LogOutput::Console,
            format: LogFormat::Human,
            file_path: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Self {
        let filter = env::var("RUST_LOG")
            .or_else(|_| env::var("LOG_LEVEL"))
            .unwrap_or_else(|_| DEFAULT_LEVEL.to_string());

        Self {
            filter,
            output: env::var("LOG_OUTPUT")
                .map(|v| LogOutput::parse(&v))
                .unwrap_or(LogOutput::Console),
            format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Human),
            file_path: env::var("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }

    /// Promotes the filter to `debug` when the caller asked for verbose output.
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose && self.filter == DEFAULT_LEVEL {
            self.filter = "debug".to_string();
        }
        self
    }

    /// Builds the env filter, quieting the noisy runtime and database crates.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let invalid = |reason: String| LoggingError::InvalidFilter {
            filter: self.filter.clone(),
            reason,
        };

        let mut filter = EnvFilter::try_new(&self.filter).map_err(|e| invalid(e.to_string()))?;
        for directive in ["tokio=warn", "sqlx=warn"] {
            filter = filter.add_directive(directive.parse().map_err(|e| invalid(format!("{e}")))?);
        }
        Ok(filter)
    }

    fn file_parts(&self) -> (&Path, &Path) {
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/tmp"));
        let name = self
            .file_path
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("studio-cli.log"));
        (dir, name)
    }
}

/// Initializes the global subscriber from the environment.
///
/// The returned guard must be held for the lifetime of the process when file
/// output is enabled, otherwise buffered lines are lost on exit.
pub fn init_subscriber() -> Result<Option<WorkerGuard>, LoggingError> {
    init_with(&LogSettings::from_env())
}

/// Initializes the global subscriber with explicit settings.
pub fn init_with(settings: &LogSettings) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = settings.env_filter()?;
    let subscriber = registry().with(env_filter);

    let mut guard = None;
    let file_writer = if settings.output.to_file() {
        let (dir, name) = settings.file_parts();
        let appender = tracing_appender::rolling::daily(dir, name);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        Some(non_blocking)
    } else {
        None
    };

    let console_layer = settings.output.to_console().then(|| match settings.format {
        LogFormat::Json => fmt::layer().with_writer(std::io::stdout).json().boxed(),
        LogFormat::Compact => fmt::layer().with_writer(std::io::stdout).compact().boxed(),
        LogFormat::Human => fmt::layer().with_writer(std::io::stdout).pretty().boxed(),
    });

    let file_layer = file_writer.map(|writer| match settings.format {
        LogFormat::Json => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .json()
            .boxed(),
        _ => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    });

    subscriber
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parsing() {
        assert_eq!(LogOutput::parse("console"), LogOutput::Console);
        assert_eq!(LogOutput::parse("FILE"), LogOutput::File);
        assert_eq!(LogOutput::parse("both"), LogOutput::Both);
        assert_eq!(LogOutput::parse("none"), LogOutput::Disabled);
        assert_eq!(LogOutput::parse("garbage"), LogOutput::Console);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Human);
    }

    #[test]
    fn test_verbose_only_promotes_default_level() {
        let settings = LogSettings::default().verbose(true);
        assert_eq!(settings.filter, "debug");

        let settings = LogSettings {
            filter: "warn".to_string(),
            ..LogSettings::default()
        }
        .verbose(true);
        assert_eq!(settings.filter, "warn");
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let settings = LogSettings {
            filter: "studio=notalevel".to_string(),
            ..LogSettings::default()
        };
        assert!(matches!(
            settings.env_filter(),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_file_parts_fall_back_to_tmp() {
        let settings = LogSettings {
            file_path: PathBuf::from("studio.log"),
            ..LogSettings::default()
        };
        let (dir, name) = settings.file_parts();
        assert_eq!(dir, Path::new("/tmp"));
        assert_eq!(name, Path::new("studio.log"));
    }
}
