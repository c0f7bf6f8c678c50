use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Result of waiting for a pacer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The slot's deadline passed; the caller may release its next chunk.
    Elapsed,
    /// The cancel token fired first. The reserved slot was returned.
    Cancelled,
}

/// A capacity-1 token bucket emitting one permit per period.
///
/// The first tick after construction fires immediately; later callers each
/// reserve the next free slot, so concurrent waiters are serialized one
/// period apart. The pacer is shared by every transfer on a throttler and is
/// used purely as a "release the next chunk" rendezvous.
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for the next slot, or bail out when `cancel` fires first.
    ///
    /// A cancelled waiter hands its unused slot back, so cancellation does
    /// not push later waiters further into the future.
    pub async fn tick(&self, cancel: &CancellationToken) -> Tick {
        let deadline = self.reserve();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.release(deadline);
                Tick::Cancelled
            }
            _ = sleep_until(deadline) => Tick::Elapsed,
        }
    }

    fn reserve(&self) -> Instant {
        let mut next = self.next_slot.lock().expect("pacer lock poisoned");
        let now = Instant::now();
        let deadline = match *next {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        *next = Some(deadline + self.period);
        deadline
    }

    fn release(&self, deadline: Instant) {
        let mut next = self.next_slot.lock().expect("pacer lock poisoned");
        // Only roll back if ours is still the latest reservation.
        if *next == Some(deadline + self.period) {
            *next = Some(deadline);
        }
    }
}
