//! Background-execution permit: acquire on first pending timer, release on last.
//!
//! The [`PermitGuard`] owns one [`KeepAlive`] backend and keeps the
//! bookkeeping [`PermitState`]. The platform side is best-effort: a refused
//! or expired grant is logged and the timers keep running without it.
//!
//! ```text
//! scheduler worker ──► PermitGuard::acquire / release_if_idle
//!                          │
//!                          ▼
//!                    KeepAlive backend ──(expiry)──► ExpiryNotifier ──► worker queue
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PermitError;
use crate::types::PermitState;

type ExpirySink = Arc<dyn Fn(u64) + Send + Sync>;

/// Handed to a backend on every grant; call [`notify`](Self::notify) when
/// the platform revokes that grant.
///
/// Each notifier is bound to one grant number, so a late expiry for a grant
/// that was already released or replaced is recognized and ignored.
#[derive(Clone)]
pub struct ExpiryNotifier {
    grant: u64,
    sink: ExpirySink,
}

impl ExpiryNotifier {
    pub fn new(grant: u64, sink: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self {
            grant,
            sink: Arc::new(sink),
        }
    }

    fn from_sink(grant: u64, sink: &ExpirySink) -> Self {
        Self {
            grant,
            sink: Arc::clone(sink),
        }
    }

    #[must_use]
    pub fn grant(&self) -> u64 {
        self.grant
    }

    /// Report that the platform expired this grant.
    pub fn notify(&self) {
        (self.sink)(self.grant);
    }
}

impl std::fmt::Debug for ExpiryNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryNotifier")
            .field("grant", &self.grant)
            .finish_non_exhaustive()
    }
}

/// Platform permit primitive: a wake lock, a background-task assertion, or
/// nothing at all.
///
/// `acquire` and `release` are only ever called from the scheduler's
/// serialized queue. `release` must be a no-op when nothing is held.
///
/// Custom backends report failures that fit neither [`PermitError::Refused`]
/// nor [`PermitError::Unavailable`] (a failed OS call, a dead service
/// binding) as [`PermitError::Platform`]. Every error is counted in
/// [`PermitStats::platform_failures`] and logged; the logical state still
/// becomes `Held`.
pub trait KeepAlive: Send {
    /// Short backend label used in logs and snapshots.
    fn name(&self) -> &'static str;

    /// Tag handed to the platform (wake-lock tag / task name).
    fn tag(&self) -> &str;

    /// Ask the platform for a permit. Keep `expiry` if the platform can
    /// revoke the grant later.
    fn acquire(&mut self, expiry: ExpiryNotifier) -> Result<(), PermitError>;

    fn release(&mut self);

    /// Whether the platform currently honours a grant.
    fn is_held(&self) -> bool;
}

/// Permit counters exposed through scheduler snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermitStats {
    /// NotHeld -> Held transitions.
    pub acquisitions: u64,
    /// Held -> NotHeld transitions.
    pub releases: u64,
    /// Grants the platform accepted.
    pub platform_grants: u64,
    /// Grants the platform refused.
    pub platform_failures: u64,
    /// Grants the platform revoked while held.
    pub expiries: u64,
}

/// Reference-counted permit bookkeeping.
///
/// The scheduler calls [`acquire`](Self::acquire) whenever it registers a
/// timer and [`release_if_idle`](Self::release_if_idle) after any removal, so
/// the state is `Held` exactly while a timer is pending. Dropping the guard
/// releases unconditionally.
pub struct PermitGuard {
    backend: Box<dyn KeepAlive>,
    state: PermitState,
    grant: u64,
    reacquire_on_expiry: bool,
    sink: ExpirySink,
    stats: PermitStats,
}

impl PermitGuard {
    /// `sink` receives the grant number of every expiry the backend reports.
    pub fn new(
        backend: Box<dyn KeepAlive>,
        reacquire_on_expiry: bool,
        sink: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            backend,
            state: PermitState::NotHeld,
            grant: 0,
            reacquire_on_expiry,
            sink: Arc::new(sink),
            stats: PermitStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PermitState {
        self.state
    }

    /// Whether the platform currently honours the permit.
    #[must_use]
    pub fn platform_granted(&self) -> bool {
        self.backend.is_held()
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[must_use]
    pub fn stats(&self) -> PermitStats {
        self.stats
    }

    /// Take the permit if not already held. Idempotent.
    pub fn acquire(&mut self) {
        if self.state.is_held() {
            return;
        }
        self.state = PermitState::Held;
        self.stats.acquisitions += 1;
        self.request_grant();
    }

    /// Drop the permit if held. Idempotent.
    pub fn release(&mut self) {
        if !self.state.is_held() {
            return;
        }
        self.backend.release();
        // invalidates any expiry still in flight for the old grant
        self.grant += 1;
        self.state = PermitState::NotHeld;
        self.stats.releases += 1;
        info!(
            permit = self.backend.name(),
            tag = self.backend.tag(),
            "Background permit released"
        );
    }

    /// Release only when no timer is pending. Returns whether a release happened.
    pub fn release_if_idle(&mut self, idle: bool) -> bool {
        if idle && self.state.is_held() {
            self.release();
            true
        } else {
            false
        }
    }

    /// Handle a platform expiry for `grant`.
    pub fn handle_expiry(&mut self, grant: u64) {
        if grant != self.grant || !self.state.is_held() {
            debug!(
                permit = self.backend.name(),
                grant,
                current = self.grant,
                "Ignoring stale permit expiry"
            );
            return;
        }

        self.stats.expiries += 1;
        self.backend.release();
        warn!(
            permit = self.backend.name(),
            tag = self.backend.tag(),
            grant,
            reacquire = self.reacquire_on_expiry,
            "Platform expired the background permit while timers are pending"
        );

        if self.reacquire_on_expiry {
            self.request_grant();
        }
    }

    fn request_grant(&mut self) {
        self.grant += 1;
        let notifier = ExpiryNotifier::from_sink(self.grant, &self.sink);
        match self.backend.acquire(notifier) {
            Ok(()) => {
                self.stats.platform_grants += 1;
                info!(
                    permit = self.backend.name(),
                    tag = self.backend.tag(),
                    grant = self.grant,
                    "Background permit acquired"
                );
            }
            Err(err) => {
                self.stats.platform_failures += 1;
                warn!(
                    permit = self.backend.name(),
                    tag = self.backend.tag(),
                    error = %err,
                    "Background permit not granted; timers continue best-effort"
                );
            }
        }
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PermitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitGuard")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("grant", &self.grant)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Backend for platforms that never suspend timers: always granted.
#[derive(Debug)]
pub struct NoopKeepAlive {
    tag: String,
    held: bool,
}

impl NoopKeepAlive {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            held: false,
        }
    }
}

impl KeepAlive for NoopKeepAlive {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn acquire(&mut self, _expiry: ExpiryNotifier) -> Result<(), PermitError> {
        self.held = true;
        Ok(())
    }

    fn release(&mut self) {
        self.held = false;
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

/// Backend that always refuses.
#[derive(Debug)]
pub struct DisabledKeepAlive {
    tag: String,
}

impl DisabledKeepAlive {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
        }
    }
}

impl KeepAlive for DisabledKeepAlive {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn acquire(&mut self, _expiry: ExpiryNotifier) -> Result<(), PermitError> {
        Err(PermitError::Unavailable(format!(
            "permit backend disabled for {}",
            self.tag
        )))
    }

    fn release(&mut self) {}

    fn is_held(&self) -> bool {
        false
    }
}

struct Grant {
    expired: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

/// Backend whose grants last a fixed budget, like a mobile background task.
///
/// When the budget elapses the grant is marked expired and the notifier
/// fires. Requires a tokio runtime on the calling thread.
pub struct BudgetedKeepAlive {
    tag: String,
    budget: Duration,
    grant: Option<Grant>,
}

impl BudgetedKeepAlive {
    #[must_use]
    pub fn new(tag: &str, budget: Duration) -> Self {
        Self {
            tag: tag.to_string(),
            budget,
            grant: None,
        }
    }

    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl KeepAlive for BudgetedKeepAlive {
    fn name(&self) -> &'static str {
        "budgeted"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn acquire(&mut self, expiry: ExpiryNotifier) -> Result<(), PermitError> {
        if self.is_held() {
            return Ok(());
        }
        self.release();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PermitError::Unavailable(format!("no tokio runtime: {e}")))?;
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);
        let budget = self.budget;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(budget).await;
            flag.store(true, Ordering::SeqCst);
            expiry.notify();
        });

        self.grant = Some(Grant { expired, timer });
        Ok(())
    }

    fn release(&mut self) {
        if let Some(grant) = self.grant.take() {
            grant.timer.abort();
        }
    }

    fn is_held(&self) -> bool {
        self.grant
            .as_ref()
            .is_some_and(|grant| !grant.expired.load(Ordering::SeqCst))
    }
}

impl Drop for BudgetedKeepAlive {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BudgetedKeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetedKeepAlive")
            .field("tag", &self.tag)
            .field("budget", &self.budget)
            .field("held", &self.is_held())
            .finish()
    }
}
