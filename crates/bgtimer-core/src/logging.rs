//! Structured logging for bgtimer
//!
//! One global `tracing` subscriber writing to stderr, plus an optional
//! append-only log file. Both sinks share the configured [`LogFormat`].
//!
//! ```ignore
//! use bgtimer_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! # Correlation Fields
//!
//! Spans and events in this crate use:
//! - `timer_id`: caller-assigned timer id
//! - `kind`: `one_shot` or `repeating`
//! - `generation`: registry generation of the entry
//! - `period_ms`: scheduled delay or interval
//! - `permit`: permit backend name
//! - `pending`: combined number of pending timers

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

static INSTALLED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `[log]` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn or error. `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    /// Also append to this file (created with a 0700 parent dir on unix).
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)?;
    #[cfg(unix)]
    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<File> {
    ensure_parent_dir(path)?;
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Layer for one sink in the chosen format.
fn sink_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber. Only the first successful call installs;
/// later calls return [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INSTALLED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let level: Level = config
        .level
        .trim()
        .parse()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let mut sinks = vec![sink_layer(config.format, io::stderr, true)];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        sinks.push(sink_layer(config.format, Arc::new(file), false));
    }

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(sinks).with(filter))?;
    let _ = INSTALLED.set(());

    tracing::info!(
        log_level = %level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}
