//! Deterministic virtual time driver for Embassy.
//!
//! This module implements a global `embassy_time_driver::Driver` whose clock
//! never runs on its own: `now()` returns a tick counter that only moves when
//! [`advance_to_next_deadline`] is called, jumping straight to the earliest
//! pending deadline and waking every task registered for it. There is no
//! wall-clock mapping at all, which is what makes replaying the same scene
//! with the same seed produce bit-identical event orderings.
//!
//! This keeps the two-threads-one-clock shape of the original real-time-scaled
//! driver this was adapted from: the Embassy executor runs forever on its own
//! background thread (see `simulator::Simulator::run`), and a second thread —
//! the *pump* thread — alternates between letting the executor drain
//! everything currently runnable and asking the clock to jump ahead.
//!
//! ## Settling a wake batch
//!
//! Before the pump is allowed to advance the clock past a deadline it just
//! woke, it must know every task that deadline woke has actually reacted —
//! not just been unparked. Every suspension point this engine ever awaits is
//! one of: a fresh `Timer`/`with_timeout` wait, which re-registers with this
//! driver via `schedule_wake` (including the internal timeout branch of a
//! `with_timeout` race, registered on that future's very first poll even if
//! the race is later won by the other side); or an `embassy-sync` primitive
//! (the per-node buffer slot, the per-node Ack signal) that is always
//! resolved synchronously by another part of the same task's own code on the
//! same single executor thread, never by a wakeup this driver would need to
//! deliver. So instead of a fixed number of `yield_now()` calls,
//! [`advance_to_next_deadline`] counts the wakers it is about to fire into
//! `PENDING_REACTIONS`, and every subsequent `schedule_wake` call — a task
//! reaching its *next* suspension point — decrements it; the pump's
//! [`wait_for_reactions_to_settle`] blocks on the same condition variable
//! `schedule_wake` notifies until the count reaches zero. This makes "did
//! everything woken by tick T finish reacting" an actual fact the driver
//! tracks, not a guess about scheduling slices.
//!
//! A task whose only remaining work before its next `Timer` wait is routing a
//! packet through a synchronous, non-blocking hand-off (see `simulator.rs`'s
//! per-node injection queue) never needs to be tracked at all: it cannot
//! suspend on anything this driver doesn't already see.
//!
//! ## Lock Ordering
//!
//! There is a single lock (`SCHED`) guarding the deadline queue; `NOW` and
//! `PENDING_REACTIONS` are plain atomics read outside that lock. Unlike the
//! real-time-scaled driver this replaces, there is no second lock to order
//! against.

use core::task::Waker;
use embassy_time_driver::{time_driver_impl, Driver};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};

#[derive(Default)]
struct SchedulerState {
    queue: BTreeMap<u64, Vec<Waker>>,
}

static NOW: AtomicU64 = AtomicU64::new(0);
static SCHED: OnceLock<Mutex<SchedulerState>> = OnceLock::new();
static CV: OnceLock<Condvar> = OnceLock::new();

/// Number of tasks woken by the current batch that have not yet reached
/// their next suspension point. See the module docs' "Settling a wake
/// batch" section. A `schedule_wake` call unrelated to any batch the pump
/// has issued (e.g. a task's very first timer, before the pump has woken
/// anything) would otherwise underflow this; `fetch_update` below floors it
/// at zero instead, which is always the correct reading to converge on.
static PENDING_REACTIONS: AtomicUsize = AtomicUsize::new(0);

fn sched() -> &'static Mutex<SchedulerState> {
    SCHED.get_or_init(|| Mutex::new(SchedulerState::default()))
}

fn cv() -> &'static Condvar {
    CV.get_or_init(Condvar::new)
}

struct VirtualDriver;

impl Driver for VirtualDriver {
    fn now(&self) -> u64 {
        NOW.load(Ordering::Acquire)
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        let mut guard = sched().lock().unwrap();
        guard.queue.entry(at).or_default().push(waker.clone());
        drop(guard);
        let _ = PENDING_REACTIONS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        cv().notify_all();
    }
}

time_driver_impl!(static DRIVER: VirtualDriver = VirtualDriver);

/// Current virtual time in Embassy ticks.
pub fn now_ticks() -> u64 {
    NOW.load(Ordering::Acquire)
}

/// Number of distinct future deadlines still queued. Zero means the event
/// loop has nothing left to wait for.
pub fn pending_deadlines() -> usize {
    sched().lock().unwrap().queue.len()
}

/// Block the pump thread until every task woken by the last
/// [`advance_to_next_deadline`] call has reached its next suspension point.
pub fn wait_for_reactions_to_settle() {
    let guard = sched().lock().unwrap();
    let _unused = cv().wait_while(guard, |_| PENDING_REACTIONS.load(Ordering::SeqCst) > 0).unwrap();
}

/// Pop the earliest pending deadline, jump the virtual clock to it, and wake
/// every waker registered for that tick. Returns `false` if the queue was
/// empty (nothing left to advance to).
pub fn advance_to_next_deadline() -> bool {
    let (next_at, wakers) = {
        let mut guard = sched().lock().unwrap();
        let next_at = match guard.queue.keys().next().copied() {
            Some(at) => at,
            None => return false,
        };
        let wakers = guard.queue.remove(&next_at).unwrap_or_default();
        (next_at, wakers)
    };
    NOW.store(next_at, Ordering::Release);
    PENDING_REACTIONS.fetch_add(wakers.len(), Ordering::SeqCst);
    for w in wakers {
        w.wake();
    }
    true
}

/// Block the calling thread until a deadline is queued (used by the pump
/// thread to avoid busy-looping while the executor is starting up).
pub fn wait_for_deadline() {
    let guard = sched().lock().unwrap();
    if guard.queue.is_empty() {
        let _unused = cv().wait(guard).unwrap();
    }
}

/// Reset the clock and deadline queue to their initial state. Not used by
/// the simulator itself — intended for test harnesses (e.g. a seeded-replay
/// test) that need two runs sharing this process to start from identical
/// driver state. Any waker left registered by a still-running executor
/// thread from a previous run is dropped along with the queue; that thread's
/// tasks simply never wake again, consistent with the documented
/// `Box::leak`'d-executor lifetime in `simulator.rs`.
#[doc(hidden)]
pub fn reset_for_tests() {
    let mut guard = sched().lock().unwrap();
    guard.queue.clear();
    drop(guard);
    NOW.store(0, Ordering::Release);
    PENDING_REACTIONS.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::task::Wake;

    static TEST_GUARD: StdMutex<()> = StdMutex::new(());

    struct CountingWaker(std::sync::atomic::AtomicUsize);
    impl Wake for CountingWaker {
        fn wake(self: std::sync::Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn wake_by_ref(self: &std::sync::Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn advance_jumps_to_earliest_deadline_and_wakes_it() {
        let _g = TEST_GUARD.lock().unwrap();
        reset_for_tests();

        let driver = VirtualDriver;
        let w1 = std::sync::Arc::new(CountingWaker(std::sync::atomic::AtomicUsize::new(0)));
        let w2 = std::sync::Arc::new(CountingWaker(std::sync::atomic::AtomicUsize::new(0)));
        driver.schedule_wake(100, &w1.clone().into());
        driver.schedule_wake(50, &w2.clone().into());
        PENDING_REACTIONS.store(0, Ordering::SeqCst);

        assert_eq!(pending_deadlines(), 2);
        assert!(advance_to_next_deadline());
        assert_eq!(now_ticks(), 50);
        assert_eq!(w2.0.load(Ordering::SeqCst), 1);
        assert_eq!(w1.0.load(Ordering::SeqCst), 0);

        assert!(advance_to_next_deadline());
        assert_eq!(now_ticks(), 100);
        assert_eq!(w1.0.load(Ordering::SeqCst), 1);

        assert!(!advance_to_next_deadline());
    }

    #[test]
    fn wait_for_reactions_to_settle_returns_once_every_woken_task_resuspends() {
        let _g = TEST_GUARD.lock().unwrap();
        reset_for_tests();

        let driver = VirtualDriver;
        let w = std::sync::Arc::new(CountingWaker(std::sync::atomic::AtomicUsize::new(0)));
        driver.schedule_wake(10, &w.clone().into());
        PENDING_REACTIONS.store(0, Ordering::SeqCst);

        assert!(advance_to_next_deadline());
        assert_eq!(PENDING_REACTIONS.load(Ordering::SeqCst), 1);

        // Simulate the woken task reaching its next suspension point.
        driver.schedule_wake(20, &w.clone().into());
        wait_for_reactions_to_settle();
        assert_eq!(PENDING_REACTIONS.load(Ordering::SeqCst), 0);

        reset_for_tests();
    }
}
