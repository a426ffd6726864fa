//! Shared vocabulary: timer ids, kinds, permit state, callbacks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Caller-assigned timer identifier.
///
/// Unique per active timer within its own [`TimerKind`]; a one-shot and a
/// repeating timer may share the same number.
pub type TimerId = i64;

/// Callback invoked on the scheduler's serialized queue with the fired id.
pub type TimerCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

/// Which registry a timer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    OneShot,
    Repeating,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneShot => write!(f, "one_shot"),
            Self::Repeating => write!(f, "repeating"),
        }
    }
}

/// Bookkeeping state of the background-execution permit.
///
/// `Held` means the guard considers itself responsible for a permit, which
/// is true exactly while at least one timer is pending. Whether the platform
/// actually granted it is tracked separately (see
/// [`PermitGuard::platform_granted`](crate::permit::PermitGuard::platform_granted)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitState {
    Held,
    #[default]
    NotHeld,
}

impl PermitState {
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Held)
    }
}

impl std::fmt::Display for PermitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Held => write!(f, "held"),
            Self::NotHeld => write!(f, "not_held"),
        }
    }
}
