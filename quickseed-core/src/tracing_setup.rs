//! Logging for the quickseed binary.
//!
//! Two layers share one registry: a console layer scoped to the quickseed
//! crates, and a line-buffered trace of the whole run written under
//! [`LoggingConfig::logs_dir`].

use std::fs::File;
use std::io::LineWriter;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingConfig;
use crate::{QuickseedError, Result};

/// File inside the logs directory that holds the trace of the latest run.
pub const LAST_RUN_LOG: &str = "quickseed-last-run.log";

/// Directives written to the trace file regardless of the console level.
const FILE_DIRECTIVES: &str = "info,quickseed=trace,tower_http=debug";

/// Console directives used when `RUST_LOG` is unset.
///
/// Quickseed targets log at `level`; request plumbing only reports problems.
pub fn console_directives(level: Level) -> String {
    format!(
        "quickseed={},tower_http=warn",
        level.as_str().to_ascii_lowercase()
    )
}

/// Creates the logs directory and truncates the last-run log inside it.
///
/// # Errors
///
/// - `QuickseedError::Io` - The directory or the file cannot be created
pub fn open_last_run_log(config: &LoggingConfig) -> Result<(PathBuf, File)> {
    std::fs::create_dir_all(&config.logs_dir)?;
    let path = config.logs_dir.join(LAST_RUN_LOG);
    let file = File::create(&path)?;
    Ok((path, file))
}

/// Installs the global subscriber and returns the path of the trace file.
///
/// # Errors
///
/// - `QuickseedError::Io` - The trace file cannot be created
/// - `QuickseedError::Configuration` - `RUST_LOG` is invalid or a subscriber is already installed
pub fn init_tracing(console_level: Level, config: &LoggingConfig) -> Result<PathBuf> {
    let (path, file) = open_last_run_log(config)?;

    let console_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(rust_log) => parse_filter(&rust_log)?,
        Err(_) => parse_filter(&console_directives(console_level))?,
    };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(Mutex::new(LineWriter::new(file)))
        .with_filter(parse_filter(FILE_DIRECTIVES)?);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| QuickseedError::Configuration {
            reason: format!("logging already initialized: {e}"),
        })?;

    tracing::info!(
        "Logging to console at {} and to {}",
        console_level,
        path.display()
    );
    Ok(path)
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::builder()
        .parse(directives)
        .map_err(|e| QuickseedError::Configuration {
            reason: format!("invalid log filter {directives:?}: {e}"),
        })
}

/// Console verbosity selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_console_directives_scope_quickseed_targets() {
        assert_eq!(
            console_directives(Level::DEBUG),
            "quickseed=debug,tower_http=warn"
        );
        assert!(parse_filter(&console_directives(Level::TRACE)).is_ok());
        assert!(parse_filter(FILE_DIRECTIVES).is_ok());
    }

    #[test]
    fn test_invalid_filter_is_configuration_error() {
        let err = parse_filter("quickseed=loud").unwrap_err();
        assert!(matches!(err, QuickseedError::Configuration { .. }));
    }

    #[test]
    fn test_last_run_log_is_created_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            logs_dir: dir.path().join("nested").join("logs"),
        };

        let (path, _) = open_last_run_log(&config).unwrap();
        assert_eq!(path, config.logs_dir.join(LAST_RUN_LOG));
        std::fs::write(&path, "previous run").unwrap();

        open_last_run_log(&config).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_cli_level_parses_through_clap() {
        let level = CliLogLevel::from_str("debug", true).unwrap();
        assert_eq!(level, CliLogLevel::Debug);
        assert_eq!(Level::from(level), Level::DEBUG);
    }
}
