//! Scheduling facade: schedule/cancel one-shot and repeating timers.
//!
//! All state lives in a single worker task. The public [`BackgroundTimer`]
//! handle only enqueues commands, so none of the operations block, and
//! every registry mutation, permit transition and callback runs in
//! submission order on one lane.
//!
//! ```text
//! BackgroundTimer ──Schedule/Cancel──► ┌──────────── worker ────────────┐
//!                                      │ TimerRegistry<OneShot>         │
//! platform timer ───────Fire─────────► │ TimerRegistry<Repeating>       │
//!                                      │ PermitGuard ──► KeepAlive      │
//! KeepAlive expiry ─PermitExpired────► └────────────────────────────────┘
//! ```
//!
//! A cancel can never lose to a firing: the firing is itself a queued
//! command, and it carries the generation of the entry that armed it. Once
//! the cancel has run, any late firing finds no matching generation and is
//! dropped.
//!
//! Callbacks run on the worker. A slow callback delays everything queued
//! behind it. A callback that captures a `BackgroundTimer` clone keeps the
//! worker alive until [`BackgroundTimer::shutdown`] is called.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::config::{Config, SchedulerConfig};
use crate::error::Error;
use crate::permit::{KeepAlive, PermitGuard, PermitStats};
use crate::registry::{OneShot, Repeating, TimerEntry, TimerHandle, TimerRegistry};
use crate::types::{PermitState, TimerCallback, TimerId, TimerKind};

enum Command {
    Schedule {
        kind: TimerKind,
        id: TimerId,
        period: Duration,
        callback: TimerCallback,
    },
    Cancel {
        kind: TimerKind,
        id: TimerId,
    },
    Fire {
        kind: TimerKind,
        id: TimerId,
        generation: u64,
    },
    PermitExpired {
        grant: u64,
    },
    Snapshot(oneshot::Sender<SchedulerSnapshot>),
    Shutdown(oneshot::Sender<SchedulerSnapshot>),
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    /// Schedules that replaced a live timer with the same id and kind.
    pub superseded: u64,
    /// Cancels that removed a live timer.
    pub cancelled: u64,
    pub fired: u64,
    pub callback_failures: u64,
    /// Firings dropped because their entry was cancelled or superseded.
    pub stale_firings: u64,
}

/// Point-in-time view of the worker state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub one_shot: Vec<TimerId>,
    pub repeating: Vec<TimerId>,
    pub permit: PermitState,
    pub platform_granted: bool,
    pub permit_backend: String,
    pub stats: SchedulerStats,
    pub permit_stats: PermitStats,
}

impl SchedulerSnapshot {
    /// Combined number of pending timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.one_shot.len() + self.repeating.len()
    }
}

/// Cloneable handle to a background timer worker.
///
/// Dropping the last handle tears the worker down (all timers cancelled,
/// permit released). [`shutdown`](Self::shutdown) does the same and waits
/// for it.
#[derive(Clone)]
pub struct BackgroundTimer {
    tx: mpsc::UnboundedSender<Command>,
    permit: watch::Receiver<PermitState>,
}

impl BackgroundTimer {
    /// Start a worker using the backend named in `config.permit`.
    pub fn spawn(config: &Config) -> crate::Result<Self> {
        Self::spawn_with_backend(config, config.permit.build_backend())
    }

    /// Start a worker with a caller-supplied permit backend.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn spawn_with_backend(
        config: &Config,
        backend: Box<dyn KeepAlive>,
    ) -> crate::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("background timer needs a tokio runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (permit_tx, permit_rx) = watch::channel(PermitState::NotHeld);
        let weak = tx.downgrade();

        let expiry_tx = weak.clone();
        let permit = PermitGuard::new(backend, config.permit.reacquire_on_expiry, move |grant| {
            if let Some(tx) = expiry_tx.upgrade() {
                let _ = tx.send(Command::PermitExpired { grant });
            }
        });

        info!(
            permit = permit.backend_name(),
            min_repeat_interval_ms = config.scheduler.min_repeat_interval_ms,
            max_delay_ms = config.scheduler.max_delay_ms,
            "Background timer started"
        );

        let worker = Worker {
            rx,
            tx: weak,
            config: config.scheduler.clone(),
            one_shot: TimerRegistry::new(),
            repeating: TimerRegistry::new(),
            permit,
            permit_tx,
            next_generation: 0,
            stats: SchedulerStats::default(),
        };
        runtime.spawn(worker.run());

        Ok(Self {
            tx,
            permit: permit_rx,
        })
    }

    /// Fire `callback(id)` once after `delay`. Replaces any pending one-shot
    /// with the same id. Returns `id` unchanged.
    pub fn schedule_once<F>(&self, id: TimerId, delay: Duration, callback: F) -> TimerId
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.submit(Command::Schedule {
            kind: TimerKind::OneShot,
            id,
            period: delay,
            callback: Arc::new(callback),
        });
        id
    }

    /// Cancel a pending one-shot. Unknown ids are ignored.
    pub fn cancel_once(&self, id: TimerId) {
        self.submit(Command::Cancel {
            kind: TimerKind::OneShot,
            id,
        });
    }

    /// Fire `callback(id)` every `interval` until cancelled. Replaces any
    /// repeating timer with the same id. Returns `id` unchanged.
    pub fn schedule_repeating<F>(&self, id: TimerId, interval: Duration, callback: F) -> TimerId
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.submit(Command::Schedule {
            kind: TimerKind::Repeating,
            id,
            period: interval,
            callback: Arc::new(callback),
        });
        id
    }

    /// Cancel a repeating timer. Unknown ids are ignored.
    pub fn cancel_repeating(&self, id: TimerId) {
        self.submit(Command::Cancel {
            kind: TimerKind::Repeating,
            id,
        });
    }

    /// Latest permit state published by the worker.
    ///
    /// Lags commands still in the queue: right after `schedule_*` this may
    /// still read `NotHeld`. Await [`flush`](Self::flush) or
    /// [`snapshot`](Self::snapshot) first to see the effect of your own calls.
    #[must_use]
    pub fn permit_state(&self) -> PermitState {
        *self.permit.borrow()
    }

    /// Snapshot taken after everything submitted so far has run.
    /// `None` once the worker is gone.
    pub async fn snapshot(&self) -> Option<SchedulerSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.submit(Command::Snapshot(reply)) {
            return None;
        }
        rx.await.ok()
    }

    /// Wait until everything submitted before this call has executed.
    pub async fn flush(&self) {
        let _ = self.snapshot().await;
    }

    /// Cancel every timer, release the permit, stop the worker.
    ///
    /// Returns the final snapshot, or `None` if the worker was already gone.
    pub async fn shutdown(&self) -> Option<SchedulerSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.submit(Command::Shutdown(reply)) {
            return None;
        }
        rx.await.ok()
    }

    /// Whether the worker has stopped accepting commands.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn submit(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            debug!("Background timer is shut down; request ignored");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for BackgroundTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTimer")
            .field("permit", &self.permit_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::WeakUnboundedSender<Command>,
    config: SchedulerConfig,
    one_shot: TimerRegistry<OneShot>,
    repeating: TimerRegistry<Repeating>,
    permit: PermitGuard,
    permit_tx: watch::Sender<PermitState>,
    next_generation: u64,
    stats: SchedulerStats,
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Schedule {
                    kind,
                    id,
                    period,
                    callback,
                } => self.schedule(kind, id, period, callback),
                Command::Cancel { kind, id } => self.cancel(kind, id),
                Command::Fire {
                    kind,
                    id,
                    generation,
                } => self.fire(kind, id, generation),
                Command::PermitExpired { grant } => self.permit.handle_expiry(grant),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown(reply) => {
                    self.teardown("shutdown requested");
                    let _ = reply.send(self.snapshot());
                    return;
                }
            }
            self.publish();
        }
        self.teardown("all handles dropped");
    }

    fn schedule(&mut self, kind: TimerKind, id: TimerId, period: Duration, callback: TimerCallback) {
        let period = match kind {
            TimerKind::OneShot => self.config.clamp_delay(period),
            TimerKind::Repeating => self.config.clamp_interval(period),
        };
        self.next_generation += 1;
        let generation = self.next_generation;

        let handle = self.arm(kind, id, generation, period);
        let entry = TimerEntry::new(id, generation, period, callback).with_handle(handle);
        let superseded = match kind {
            TimerKind::OneShot => self.one_shot.put(entry),
            TimerKind::Repeating => self.repeating.put(entry),
        };
        if superseded.is_some() {
            self.stats.superseded += 1;
        }
        self.stats.scheduled += 1;
        self.permit.acquire();

        debug!(
            timer_id = id,
            kind = %kind,
            generation,
            period_ms = period.as_millis() as u64,
            pending = self.pending(),
            "Timer scheduled"
        );
    }

    fn cancel(&mut self, kind: TimerKind, id: TimerId) {
        let removed = match kind {
            TimerKind::OneShot => self.one_shot.remove(id),
            TimerKind::Repeating => self.repeating.remove(id),
        };
        if removed {
            self.stats.cancelled += 1;
            debug!(timer_id = id, kind = %kind, pending = self.pending(), "Timer cancelled");
        } else {
            debug!(timer_id = id, kind = %kind, "Cancel for unknown timer id ignored");
        }
        let idle = self.is_idle();
        self.permit.release_if_idle(idle);
    }

    fn fire(&mut self, kind: TimerKind, id: TimerId, generation: u64) {
        let current = match kind {
            TimerKind::OneShot => self.one_shot.is_current(id, generation),
            TimerKind::Repeating => self.repeating.is_current(id, generation),
        };
        let live = if current {
            match kind {
                TimerKind::OneShot => self.one_shot.get(id),
                TimerKind::Repeating => self.repeating.get(id),
            }
            .map(|entry| (Arc::clone(entry.callback()), entry.period()))
        } else {
            None
        };

        let Some((callback, period)) = live else {
            self.stats.stale_firings += 1;
            debug!(timer_id = id, kind = %kind, generation, "Dropping stale firing");
            return;
        };

        self.invoke(kind, id, &callback);

        match kind {
            TimerKind::OneShot => {
                self.one_shot.remove(id);
                let idle = self.is_idle();
                self.permit.release_if_idle(idle);
            }
            TimerKind::Repeating => {
                let handle = self.arm(kind, id, generation, period);
                if let Some(entry) = self.repeating.get_mut(id) {
                    entry.rearm(handle);
                }
            }
        }
    }

    fn invoke(&mut self, kind: TimerKind, id: TimerId, callback: &TimerCallback) {
        self.stats.fired += 1;
        debug!(timer_id = id, kind = %kind, "Timer fired");
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(id))) {
            self.stats.callback_failures += 1;
            error!(
                timer_id = id,
                kind = %kind,
                panic = %panic_message(payload.as_ref()),
                "Timer callback panicked; cleanup continues"
            );
        }
    }

    /// Start the platform timer that posts `Fire` back onto the queue.
    fn arm(&self, kind: TimerKind, id: TimerId, generation: u64, after: Duration) -> TimerHandle {
        let tx = self.tx.clone();
        TimerHandle::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Fire {
                    kind,
                    id,
                    generation,
                });
            }
        })
    }

    fn teardown(&mut self, reason: &str) {
        let cancelled = self.one_shot.clear() + self.repeating.clear();
        self.permit.release();
        self.publish();
        info!(reason, cancelled, "Background timer torn down");
    }

    fn publish(&self) {
        let state = self.permit.state();
        debug_assert_eq!(
            state.is_held(),
            !self.is_idle(),
            "permit state out of sync with registries"
        );
        self.permit_tx.send_replace(state);
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            one_shot: self.one_shot.ids(),
            repeating: self.repeating.ids(),
            permit: self.permit.state(),
            platform_granted: self.permit.platform_granted(),
            permit_backend: self.permit.backend_name().to_string(),
            stats: self.stats,
            permit_stats: self.permit.stats(),
        }
    }

    fn is_idle(&self) -> bool {
        self.one_shot.is_empty() && self.repeating.is_empty()
    }

    fn pending(&self) -> usize {
        self.one_shot.len() + self.repeating.len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
