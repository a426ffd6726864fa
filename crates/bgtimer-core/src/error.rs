//! Error types for bgtimer-core
//!
//! None of the four scheduling operations surface an error to the caller;
//! failures there are absorbed and logged. The types here cover the setup
//! paths (config, logging, worker spawn) and the permit backend contract.

use std::fmt::Write;
use thiserror::Error;

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            alternatives: Vec::new(),
        }
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bgtimer-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging setup errors
    #[error("Logging error: {0}")]
    Log(#[from] crate::logging::LogError),

    /// Runtime errors (no tokio runtime, worker already gone, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Log(_) => Some(
                Remediation::new("Initialize logging once at startup.")
                    .alternative("Check that the log file directory is writable."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Create the timer from inside a tokio runtime.")
                    .alternative("Wrap the call in `#[tokio::main]` or `Runtime::block_on`."),
            ),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .alternative("Omit --config to run with built-in defaults."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            )),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax.")
                .alternative("Run `bgt config` to print a known-good config."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Adjust the offending value to the documented range.")
                    .alternative("Run `bgt config` to see the defaults.")
            }
        }
    }
}

/// Failure reported by a [`KeepAlive`](crate::permit::KeepAlive) backend.
///
/// Never fatal: the guard logs it and keeps the timers running without a
/// platform grant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermitError {
    /// The platform declined to grant the permit right now.
    #[error("permit refused by platform: {0}")]
    Refused(String),

    /// No permit mechanism exists on this platform or in this build.
    #[error("permit unavailable: {0}")]
    Unavailable(String),

    /// Any other platform-specific failure, reported by custom backends.
    #[error("platform permit error: {0}")]
    Platform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_renders_alternatives() {
        let text = Remediation::new("do the thing")
            .alternative("or this")
            .render_plain();
        assert!(text.contains("To fix:"));
        assert!(text.contains("do the thing"));
        assert!(text.contains("- or this"));
    }

    #[test]
    fn config_error_wraps_into_error() {
        let err: Error = ConfigError::ValidationError("bad".into()).into();
        assert!(err.to_string().contains("Validation error: bad"));
        assert!(err.remediation().is_some());
    }

    #[test]
    fn log_error_wraps_into_error() {
        let err: Error = crate::logging::LogError::AlreadyInitialized.into();
        assert!(err.to_string().contains("logging already initialized"));
        assert!(err.remediation().is_some());
    }

    #[test]
    fn permit_error_display() {
        let err = PermitError::Refused("quota".into());
        assert_eq!(err.to_string(), "permit refused by platform: quota");
    }
}
