//! Boundary adapter for callers that speak in plain numbers.
//!
//! Script bridges hand over ids and durations as doubles. This adapter
//! coerces them into [`TimerId`] / [`Duration`] and echoes the id back as a
//! double, without ever surfacing an error: a bad id is logged and the call
//! becomes a no-op.
//!
//! Coercion rules:
//! - ids must be finite integers within ±(2^53 - 1)
//! - negative, NaN and `-0` durations are treated as 0 ms
//! - `+inf` saturates to [`Duration::MAX`] (never fires in practice)

use std::time::Duration;

use tracing::warn;

use crate::scheduler::BackgroundTimer;
use crate::types::TimerId;

/// Largest integer a double represents exactly.
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert a numeric id from the boundary. `None` if not an exact integer.
#[must_use]
pub fn coerce_id(raw: f64) -> Option<TimerId> {
    if !raw.is_finite() || raw.fract() != 0.0 || raw.abs() > MAX_SAFE_INTEGER {
        return None;
    }
    Some(raw as TimerId)
}

/// Convert a millisecond count from the boundary.
#[must_use]
pub fn coerce_millis(raw: f64) -> Duration {
    if raw.is_nan() || raw <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(raw / 1000.0).unwrap_or(Duration::MAX)
}

/// Numeric front end over a [`BackgroundTimer`].
#[derive(Debug, Clone)]
pub struct BridgeTimers {
    timers: BackgroundTimer,
}

impl BridgeTimers {
    #[must_use]
    pub fn new(timers: BackgroundTimer) -> Self {
        Self { timers }
    }

    #[must_use]
    pub fn timers(&self) -> &BackgroundTimer {
        &self.timers
    }

    /// One-shot timer. The callback receives the id back as a double.
    pub fn set_timeout<F>(&self, id: f64, ms: f64, callback: F) -> f64
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        if let Some(timer_id) = self.checked_id(id, "set_timeout") {
            self.timers
                .schedule_once(timer_id, coerce_millis(ms), move |fired| {
                    callback(fired as f64);
                });
        }
        id
    }

    pub fn clear_timeout(&self, id: f64) {
        if let Some(timer_id) = self.checked_id(id, "clear_timeout") {
            self.timers.cancel_once(timer_id);
        }
    }

    /// Repeating timer. The callback receives the id back as a double.
    pub fn set_interval<F>(&self, id: f64, ms: f64, callback: F) -> f64
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        if let Some(timer_id) = self.checked_id(id, "set_interval") {
            self.timers
                .schedule_repeating(timer_id, coerce_millis(ms), move |fired| {
                    callback(fired as f64);
                });
        }
        id
    }

    pub fn clear_interval(&self, id: f64) {
        if let Some(timer_id) = self.checked_id(id, "clear_interval") {
            self.timers.cancel_repeating(timer_id);
        }
    }

    fn checked_id(&self, raw: f64, operation: &'static str) -> Option<TimerId> {
        let id = coerce_id(raw);
        if id.is_none() {
            warn!(operation, raw_id = raw, "Ignoring timer call with non-integer id");
        }
        id
    }
}
