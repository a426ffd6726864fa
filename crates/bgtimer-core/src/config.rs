//! Configuration (`bgtimer.toml`).
//!
//! Every section is `#[serde(default)]`, so a partial file only overrides
//! the keys it names.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::permit::{BudgetedKeepAlive, DisabledKeepAlive, KeepAlive, NoopKeepAlive};

/// Default permit tag handed to the platform (wake-lock tag / task name).
pub const DEFAULT_PERMIT_TAG: &str = "bgtimer:keepalive";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub permit: PermitConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.permit.validate()
    }
}

/// Clamping rules applied to delays and intervals before arming a timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Repeating intervals shorter than this are raised to it (ms, >= 1).
    pub min_repeat_interval_ms: u64,
    /// Upper bound for delays and intervals (ms). 0 disables the cap.
    pub max_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_repeat_interval_ms: 1,
            max_delay_ms: 0,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_repeat_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.min_repeat_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms != 0 && self.max_delay_ms < self.min_repeat_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.max_delay_ms ({}) is below min_repeat_interval_ms ({})",
                self.max_delay_ms, self.min_repeat_interval_ms
            )));
        }
        Ok(())
    }

    /// Clamp a one-shot delay.
    #[must_use]
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        if self.max_delay_ms == 0 {
            delay
        } else {
            delay.min(Duration::from_millis(self.max_delay_ms))
        }
    }

    /// Clamp a repeating interval: raised to the minimum, then capped.
    #[must_use]
    pub fn clamp_interval(&self, interval: Duration) -> Duration {
        let raised = interval.max(Duration::from_millis(self.min_repeat_interval_ms));
        self.clamp_delay(raised)
    }
}

/// Which [`KeepAlive`] backend the scheduler uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermitBackend {
    /// Always granted, never expires (no platform suspension to defeat).
    #[default]
    Noop,
    /// Granted for `budget_ms`, then expired by the "platform".
    Budgeted,
    /// Always refused; timers run in degraded best-effort mode.
    Disabled,
}

impl std::fmt::Display for PermitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Budgeted => write!(f, "budgeted"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Background-execution permit settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PermitConfig {
    pub backend: PermitBackend,
    pub tag: String,
    /// Grant lifetime for the `budgeted` backend (ms).
    pub budget_ms: u64,
    /// Ask for a fresh grant when the platform expires one while timers are pending.
    pub reacquire_on_expiry: bool,
}

impl Default for PermitConfig {
    fn default() -> Self {
        Self {
            backend: PermitBackend::Noop,
            tag: DEFAULT_PERMIT_TAG.to_string(),
            budget_ms: 30_000,
            reacquire_on_expiry: true,
        }
    }
}

impl PermitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "permit.tag must not be empty".to_string(),
            ));
        }
        if self.backend == PermitBackend::Budgeted && self.budget_ms == 0 {
            return Err(ConfigError::ValidationError(
                "permit.budget_ms must be > 0 for the budgeted backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Instantiate the configured backend.
    #[must_use]
    pub fn build_backend(&self) -> Box<dyn KeepAlive> {
        match self.backend {
            PermitBackend::Noop => Box::new(NoopKeepAlive::new(&self.tag)),
            PermitBackend::Budgeted => Box::new(BudgetedKeepAlive::new(
                &self.tag,
                Duration::from_millis(self.budget_ms),
            )),
            PermitBackend::Disabled => Box::new(DisabledKeepAlive::new(&self.tag)),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}
