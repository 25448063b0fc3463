//! Event-scheduler primitives built on top of `embassy-time`/`embassy-sync`:
//! the one-capacity buffer slot and a generic cancellable-wait helper.
//! `now()`/`schedule_wake` themselves live in `time_driver` (the deterministic
//! driver registered with `embassy-time`); this module is the part of §4.1
//! application code actually touches.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};

pub fn now() -> Instant {
    Instant::now()
}

/// One-capacity resource per node: at most one packet may hold it at a
/// time, and only the holder may begin MAC contention. Implemented as an
/// `embassy_sync::channel::Channel` pre-loaded with a single token —
/// `acquire` is `receive()`, `release` is `send(())` — the same bounded
/// inter-task channel idiom used throughout this codebase for other
/// single-writer/single-reader handoffs.
pub struct BufferSlot {
    channel: Channel<CriticalSectionRawMutex, (), 1>,
}

impl Default for BufferSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSlot {
    pub fn new() -> Self {
        let channel = Channel::new();
        // The slot starts available: pre-load the single token.
        let _ = channel.try_send(());
        BufferSlot { channel }
    }

    /// Suspend until the slot is available, then take it.
    pub async fn acquire(&self) {
        self.channel.receive().await;
    }

    /// Return the slot. Never blocks: the channel has capacity for exactly
    /// the one token that `acquire` removed.
    pub fn release(&self) {
        let _ = self.channel.try_send(());
    }
}

/// Race `fut` against a `duration`-long timeout. Returns `None` if the
/// timeout elapsed first. This is the cancellable `wait(event)` primitive
/// from §4.1/§5: AWAIT_ACK, medium-idle, and routing-change waits are all
/// built from this.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Option<T>
where
    F: core::future::Future<Output = T>,
{
    match embassy_futures::select::select(fut, Timer::after(duration)).await {
        embassy_futures::select::Either::First(v) => Some(v),
        embassy_futures::select::Either::Second(_) => None,
    }
}
