//! Shared helpers for scheduler integration tests.
//!
//! - `RecordingKeepAlive`: backend that records every platform call and lets
//!   a test expire the current grant by hand
//! - `Counter`: callback that counts invocations per id

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bgtimer_core::config::Config;
use bgtimer_core::error::PermitError;
use bgtimer_core::permit::{ExpiryNotifier, KeepAlive};
use bgtimer_core::scheduler::BackgroundTimer;
use bgtimer_core::types::TimerId;

#[derive(Debug, Default)]
pub struct KeepAliveLog {
    pub acquires: usize,
    pub releases: usize,
    pub held: bool,
    pub notifier: Option<ExpiryNotifier>,
}

/// Backend whose calls are visible to the test through a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingKeepAlive {
    log: Arc<Mutex<KeepAliveLog>>,
    refuse: bool,
}

impl RecordingKeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn acquires(&self) -> usize {
        self.log.lock().unwrap().acquires
    }

    pub fn releases(&self) -> usize {
        self.log.lock().unwrap().releases
    }

    pub fn held(&self) -> bool {
        self.log.lock().unwrap().held
    }

    /// Simulate the platform revoking the current grant.
    pub fn expire(&self) {
        let notifier = {
            let mut log = self.log.lock().unwrap();
            log.held = false;
            log.notifier.clone()
        };
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

impl KeepAlive for RecordingKeepAlive {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn tag(&self) -> &str {
        "bgtimer:test"
    }

    fn acquire(&mut self, expiry: ExpiryNotifier) -> Result<(), PermitError> {
        let mut log = self.log.lock().unwrap();
        log.acquires += 1;
        log.notifier = Some(expiry);
        if self.refuse {
            return Err(PermitError::Refused("test backend refuses".into()));
        }
        log.held = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.releases += 1;
        log.held = false;
    }

    fn is_held(&self) -> bool {
        self.log.lock().unwrap().held
    }
}

/// Spawn a timer over a recording backend, returning both.
pub fn recorded_timer() -> (BackgroundTimer, RecordingKeepAlive) {
    let backend = RecordingKeepAlive::new();
    let timer =
        BackgroundTimer::spawn_with_backend(&Config::default(), Box::new(backend.clone())).unwrap();
    (timer, backend)
}

/// Per-id invocation counts.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    hits: Arc<Mutex<BTreeMap<TimerId, usize>>>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(TimerId) + Send + Sync + 'static {
        let hits = Arc::clone(&self.hits);
        move |id| {
            *hits.lock().unwrap().entry(id).or_default() += 1;
        }
    }

    pub fn get(&self, id: TimerId) -> usize {
        self.hits.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

/// Advance paused time and let the worker drain what became due.
pub async fn advance(timer: &BackgroundTimer, ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    timer.flush().await;
}
