//! Per-kind maps from caller id to armed platform timer.
//!
//! One-shot and repeating timers live in two independent registries, so the
//! same numeric id can be active once in each. Within a registry the last
//! writer wins: `put` on an occupied id cancels the previous timer first.
//!
//! Registries are plain single-owner data. The scheduler worker owns both and
//! is the only code that touches them, which is what serializes a firing's
//! self-cleanup against a concurrent cancel.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{TimerCallback, TimerId, TimerKind};

/// Armed platform timer. Cancelled when dropped.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawn `fut` on the current tokio runtime as the timer body.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: tokio::spawn(fut),
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registry marker for timers that fire once and retire.
#[derive(Debug, Clone, Copy)]
pub struct OneShot;

/// Registry marker for timers that re-arm until cancelled.
#[derive(Debug, Clone, Copy)]
pub struct Repeating;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::OneShot {}
    impl Sealed for super::Repeating {}
}

/// Compile-time registry kind.
pub trait RegistryKind: sealed::Sealed {
    const KIND: TimerKind;
}

impl RegistryKind for OneShot {
    const KIND: TimerKind = TimerKind::OneShot;
}

impl RegistryKind for Repeating {
    const KIND: TimerKind = TimerKind::Repeating;
}

/// One registered timer. Owns its platform handle; removing the entry
/// cancels the timer.
pub struct TimerEntry {
    id: TimerId,
    generation: u64,
    period: Duration,
    callback: TimerCallback,
    handle: Option<TimerHandle>,
}

impl TimerEntry {
    #[must_use]
    pub fn new(id: TimerId, generation: u64, period: Duration, callback: TimerCallback) -> Self {
        Self {
            id,
            generation,
            period,
            callback,
            handle: None,
        }
    }

    #[must_use]
    pub fn with_handle(mut self, handle: TimerHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn id(&self) -> TimerId {
        self.id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Delay (one-shot) or interval (repeating).
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn callback(&self) -> &TimerCallback {
        &self.callback
    }

    /// Replace the platform handle, cancelling the old one.
    pub fn rearm(&mut self, handle: TimerHandle) {
        self.handle = Some(handle);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl std::fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEntry")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("period", &self.period)
            .field("armed", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

/// Map of live timers for one [`RegistryKind`].
pub struct TimerRegistry<K: RegistryKind> {
    entries: HashMap<TimerId, TimerEntry>,
    _kind: PhantomData<K>,
}

impl<K: RegistryKind> Default for TimerRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RegistryKind> TimerRegistry<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TimerKind {
        K::KIND
    }

    /// Insert `entry`, cancelling any timer already registered under its id.
    ///
    /// Returns the generation of the superseded entry, if any.
    pub fn put(&mut self, entry: TimerEntry) -> Option<u64> {
        let id = entry.id;
        let previous = self.entries.insert(id, entry)?;
        debug!(
            timer_id = id,
            kind = %K::KIND,
            generation = previous.generation,
            "Superseded timer with reused id"
        );
        Some(previous.generation)
    }

    /// Cancel and remove the timer under `id`. No-op if absent.
    pub fn remove(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    #[must_use]
    pub fn get(&self, id: TimerId) -> Option<&TimerEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        self.entries.get_mut(&id)
    }

    /// Whether `id` is registered with exactly this `generation`.
    #[must_use]
    pub fn is_current(&self, id: TimerId, generation: u64) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.generation == generation)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cancel and remove everything. Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

impl<K: RegistryKind> std::fmt::Debug for TimerRegistry<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("kind", &K::KIND)
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn noop() -> TimerCallback {
        Arc::new(|_| {})
    }

    fn entry(id: TimerId, generation: u64) -> TimerEntry {
        TimerEntry::new(id, generation, Duration::from_millis(10), noop())
    }

    /// Handle whose task holds `tx` until aborted.
    fn watched_handle() -> (TimerHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let handle = TimerHandle::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        (handle, rx)
    }

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(TimerRegistry::<OneShot>::new().kind(), TimerKind::OneShot);
        assert_eq!(TimerRegistry::<Repeating>::new().kind(), TimerKind::Repeating);
    }

    #[test]
    fn put_then_get() {
        let mut reg = TimerRegistry::<OneShot>::new();
        assert!(reg.is_empty());
        assert_eq!(reg.put(entry(3, 1)), None);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(3).map(TimerEntry::generation), Some(1));
        assert!(reg.is_current(3, 1));
        assert!(!reg.is_current(3, 2));
    }

    #[test]
    fn put_with_reused_id_supersedes() {
        let mut reg = TimerRegistry::<Repeating>::new();
        reg.put(entry(5, 1));
        assert_eq!(reg.put(entry(5, 2)), Some(1));
        assert_eq!(reg.len(), 1);
        assert!(reg.is_current(5, 2));
        assert!(!reg.is_current(5, 1));
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut reg = TimerRegistry::<OneShot>::new();
        assert!(!reg.remove(42));
        reg.put(entry(1, 1));
        assert!(!reg.remove(42));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(1));
        assert!(reg.is_empty());
    }

    #[test]
    fn ids_are_sorted() {
        let mut reg = TimerRegistry::<OneShot>::new();
        for id in [9, -2, 4] {
            reg.put(entry(id, 1));
        }
        assert_eq!(reg.ids(), vec![-2, 4, 9]);
    }

    #[tokio::test]
    async fn remove_cancels_platform_timer() {
        let mut reg = TimerRegistry::<OneShot>::new();
        let (handle, rx) = watched_handle();
        reg.put(entry(1, 1).with_handle(handle));
        assert!(reg.get(1).unwrap().is_armed());
        reg.remove(1);
        assert!(rx.await.is_err(), "timer task should be aborted");
    }

    #[tokio::test]
    async fn supersede_cancels_previous_platform_timer() {
        let mut reg = TimerRegistry::<OneShot>::new();
        let (first, first_rx) = watched_handle();
        let (second, mut second_rx) = watched_handle();
        reg.put(entry(1, 1).with_handle(first));
        reg.put(entry(1, 2).with_handle(second));
        assert!(first_rx.await.is_err());
        assert!(matches!(
            second_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn rearm_cancels_previous_handle() {
        let mut reg = TimerRegistry::<Repeating>::new();
        let (first, first_rx) = watched_handle();
        reg.put(entry(2, 1).with_handle(first));
        let (second, _second_rx) = watched_handle();
        reg.get_mut(2).unwrap().rearm(second);
        assert!(first_rx.await.is_err());
    }

    #[tokio::test]
    async fn clear_cancels_everything() {
        let mut reg = TimerRegistry::<Repeating>::new();
        let (a, a_rx) = watched_handle();
        let (b, b_rx) = watched_handle();
        reg.put(entry(1, 1).with_handle(a));
        reg.put(entry(2, 2).with_handle(b));
        assert_eq!(reg.clear(), 2);
        assert!(reg.is_empty());
        assert!(a_rx.await.is_err());
        assert!(b_rx.await.is_err());
    }
}
