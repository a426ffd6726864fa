//! bgtimer-core: background timers that keep running while an app is idle
//!
//! Callers schedule one-shot and repeating timers by caller-chosen id. While
//! at least one timer is pending the crate holds a background-execution
//! permit from the platform, and releases it when the last timer is gone.
//!
//! # Architecture
//!
//! ```text
//! BridgeTimers (f64 ids/ms) ─► BackgroundTimer ─► worker queue
//!                                                   │
//!                          TimerRegistry<OneShot> ◄─┤
//!                        TimerRegistry<Repeating> ◄─┤
//!                                     PermitGuard ◄─┘──► KeepAlive backend
//! ```
//!
//! # Modules
//!
//! - `types`: timer ids, callbacks, kinds, permit state
//! - `permit`: permit guard and keep-alive backends
//! - `registry`: per-kind id → timer maps
//! - `scheduler`: the scheduling facade and its worker
//! - `bridge`: numeric boundary adapter
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//! - `error`: error types and remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod permit;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use bridge::BridgeTimers;
pub use config::Config;
pub use error::{Error, PermitError, Result};
pub use permit::{ExpiryNotifier, KeepAlive, PermitGuard};
pub use scheduler::{BackgroundTimer, SchedulerSnapshot};
pub use types::{PermitState, TimerId, TimerKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
