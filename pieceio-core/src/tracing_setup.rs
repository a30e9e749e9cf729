//! Tracing setup for PieceIO tools.
//!
//! Console output follows the level the user picked; a file in the logs
//! directory receives everything down to TRACE for the current run.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run debug log, overwritten on every start.
pub const LOG_FILE_NAME: &str = "pieceio-last-run.log";

/// Errors from installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    #[error("Failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Global tracing subscriber already installed")]
    AlreadyInitialized,
}

/// Path of the debug log inside `logs_dir`, defaulting to `./logs`.
pub fn log_file_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir.unwrap_or_else(|| Path::new("logs")).join(LOG_FILE_NAME)
}

/// Installs console and file logging and returns the log file path.
///
/// `RUST_LOG` overrides `console_level` for the console only.
///
/// # Errors
/// - `TracingSetupError::LogFile` - Logs directory or file could not be created
/// - `TracingSetupError::AlreadyInitialized` - Called more than once
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, TracingSetupError> {
    let log_file_path = log_file_path(logs_dir);
    let log_file = open_log_file(&log_file_path).map_err(|source| TracingSetupError::LogFile {
        path: log_file_path.clone(),
        source,
    })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| TracingSetupError::AlreadyInitialized)?;

    tracing::info!(
        "Tracing initialized: console={}, debug_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    File::create(path)
}

/// Console log levels selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliLogLevel {
    /// # Examples
    /// ```
    /// use pieceio_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}
