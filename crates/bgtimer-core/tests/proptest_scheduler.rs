//! Property-based tests for the scheduling facade.
//!
//! Verifies, over random operation sequences on paused time:
//! - permit is Held iff at least one timer is pending, after every step
//! - published permit state matches the snapshot
//! - a one-shot fires at most once per schedule call
//! - cancelling everything always ends NotHeld with no further firings
//! - interval clamping never goes below the configured minimum

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use bgtimer_core::config::{Config, SchedulerConfig};
use bgtimer_core::scheduler::BackgroundTimer;
use bgtimer_core::types::{PermitState, TimerId};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    ScheduleOnce { id: TimerId, ms: u64 },
    CancelOnce { id: TimerId },
    ScheduleRepeating { id: TimerId, ms: u64 },
    CancelRepeating { id: TimerId },
    Advance { ms: u64 },
}

fn arb_id() -> impl Strategy<Value = TimerId> {
    0i64..5
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arb_id(), 0u64..40).prop_map(|(id, ms)| Op::ScheduleOnce { id, ms }),
        2 => arb_id().prop_map(|id| Op::CancelOnce { id }),
        2 => (arb_id(), 1u64..40).prop_map(|(id, ms)| Op::ScheduleRepeating { id, ms }),
        2 => arb_id().prop_map(|id| Op::CancelRepeating { id }),
        3 => (0u64..60).prop_map(|ms| Op::Advance { ms }),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

type Hits = Arc<Mutex<BTreeMap<(u8, TimerId), usize>>>;

fn recorder(hits: &Hits, tag: u8) -> impl Fn(TimerId) + Send + Sync + 'static {
    let hits = Arc::clone(hits);
    move |id| {
        *hits.lock().unwrap().entry((tag, id)).or_default() += 1;
    }
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn permit_held_iff_pending(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = paused_runtime();
        rt.block_on(async {
            let timer = BackgroundTimer::spawn(&Config::default()).unwrap();
            for op in &ops {
                match *op {
                    Op::ScheduleOnce { id, ms } => {
                        timer.schedule_once(id, Duration::from_millis(ms), |_| {});
                    }
                    Op::CancelOnce { id } => timer.cancel_once(id),
                    Op::ScheduleRepeating { id, ms } => {
                        timer.schedule_repeating(id, Duration::from_millis(ms), |_| {});
                    }
                    Op::CancelRepeating { id } => timer.cancel_repeating(id),
                    Op::Advance { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
                }
                let snap = timer.snapshot().await.unwrap();
                prop_assert_eq!(snap.permit.is_held(), snap.pending() > 0);
                prop_assert_eq!(timer.permit_state(), snap.permit);
            }
            Ok(())
        })?;
    }

    #[test]
    fn one_shot_fires_at_most_once_per_schedule(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = paused_runtime();
        rt.block_on(async {
            let timer = BackgroundTimer::spawn(&Config::default()).unwrap();
            let hits: Hits = Arc::new(Mutex::new(BTreeMap::new()));
            let mut scheduled: BTreeMap<TimerId, usize> = BTreeMap::new();
            for op in &ops {
                match *op {
                    Op::ScheduleOnce { id, ms } => {
                        *scheduled.entry(id).or_default() += 1;
                        timer.schedule_once(id, Duration::from_millis(ms), recorder(&hits, 0));
                    }
                    Op::CancelOnce { id } => timer.cancel_once(id),
                    Op::Advance { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
                    Op::ScheduleRepeating { .. } | Op::CancelRepeating { .. } => {}
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            timer.flush().await;

            for ((_, id), count) in hits.lock().unwrap().iter() {
                prop_assert!(*count <= scheduled.get(id).copied().unwrap_or(0));
            }
            Ok(())
        })?;
    }

    #[test]
    fn cancel_all_quiesces(ops in prop::collection::vec(arb_op(), 1..30)) {
        let rt = paused_runtime();
        rt.block_on(async {
            let timer = BackgroundTimer::spawn(&Config::default()).unwrap();
            let hits: Hits = Arc::new(Mutex::new(BTreeMap::new()));
            for op in &ops {
                match *op {
                    Op::ScheduleOnce { id, ms } => {
                        timer.schedule_once(id, Duration::from_millis(ms), recorder(&hits, 0));
                    }
                    Op::CancelOnce { id } => timer.cancel_once(id),
                    Op::ScheduleRepeating { id, ms } => {
                        timer.schedule_repeating(id, Duration::from_millis(ms), recorder(&hits, 1));
                    }
                    Op::CancelRepeating { id } => timer.cancel_repeating(id),
                    Op::Advance { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
                }
            }
            for id in 0..5 {
                timer.cancel_once(id);
                timer.cancel_repeating(id);
            }
            let snap = timer.snapshot().await.unwrap();
            prop_assert_eq!(snap.pending(), 0);
            prop_assert_eq!(snap.permit, PermitState::NotHeld);

            let before = hits.lock().unwrap().clone();
            tokio::time::sleep(Duration::from_millis(200)).await;
            timer.flush().await;
            prop_assert_eq!(&*hits.lock().unwrap(), &before);
            Ok(())
        })?;
    }

    #[test]
    fn clamp_interval_respects_bounds(
        min in 1u64..100,
        cap in prop_oneof![Just(0u64), 100u64..10_000],
        requested in 0u64..20_000,
    ) {
        let config = SchedulerConfig { min_repeat_interval_ms: min, max_delay_ms: cap };
        let clamped = config.clamp_interval(Duration::from_millis(requested));
        prop_assert!(clamped >= Duration::from_millis(min));
        if cap != 0 {
            prop_assert!(clamped <= Duration::from_millis(cap));
        } else {
            prop_assert_eq!(clamped, Duration::from_millis(requested.max(min)));
        }
    }

    #[test]
    fn clamp_delay_never_raises(cap in 0u64..10_000, requested in 0u64..20_000) {
        let config = SchedulerConfig { min_repeat_interval_ms: 1, max_delay_ms: cap };
        let clamped = config.clamp_delay(Duration::from_millis(requested));
        prop_assert!(clamped <= Duration::from_millis(requested));
    }
}
