pub mod pacer;
pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;

use pacer::{Pacer, Tick};
use registry::{Activation, Registry};

/// How a paced transfer ended.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The source reached end-of-stream and every byte was delivered.
    Completed,
    /// The cancel token fired while waiting for a pacer slot.
    Cancelled,
    /// The sink or source failed mid-transfer.
    Failed(std::io::Error),
}

impl WriteOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WriteOutcome::Completed)
    }
}

/// Budget state guarded by the throttler lock: the operator-set server limit
/// and the slice of it not reserved by individual pins.
#[derive(Debug)]
struct Budget {
    total: u64,
    free: u64,
}

/// Bandwidth limiter for one server and its connections.
///
/// The server budget is partitioned between individually-pinned connections
/// and a free pool shared evenly by everyone else. Limits use 1-second
/// resolution in whole bytes, so the practical minimum is 1 B/s. Operator
/// updates are serialized on the budget lock and take effect on the next
/// pacer window of each in-flight transfer.
pub struct Throttler {
    enabled: AtomicBool,
    budget: Mutex<Budget>,
    registry: Registry,
    pacer: Pacer,
}

impl Throttler {
    pub fn new(total_limit: u64, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            budget: Mutex::new(Budget {
                total: total_limit,
                free: total_limit,
            }),
            registry: Registry::new(),
            pacer: Pacer::new(Duration::from_secs(1)),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn server_limit(&self) -> u64 {
        self.budget.lock().expect("budget lock poisoned").total
    }

    pub fn free_pool(&self) -> u64 {
        self.budget.lock().expect("budget lock poisoned").free
    }

    /// Track a connection. Idempotent.
    ///
    /// A returning key whose record still carries an individual pin gets the
    /// pin re-reserved out of the free pool, truncated to what the pool can
    /// still cover.
    pub fn register(&self, key: &str) {
        let mut budget = self.budget.lock().expect("budget lock poisoned");
        if let Activation::Reactivated { pinned: Some(limit) } = self.registry.activate(key) {
            let effective = limit.min(budget.free);
            budget.free -= effective;
            if effective != limit {
                self.registry.set_limit(key, effective);
            }
        }
    }

    /// Stop tracking a connection, returning its pinned bandwidth (if any)
    /// to the free pool. Idempotent.
    pub fn unregister(&self, key: &str) {
        let mut budget = self.budget.lock().expect("budget lock poisoned");
        if let Some(released) = self.registry.deactivate(key) {
            budget.free = (budget.free + released).min(budget.total);
        }
    }

    /// Pin `limit` bytes/s to `key`, registering the key if needed.
    ///
    /// The reservation is drawn from the free pool and silently truncated to
    /// what the pool holds. Re-pinning releases the prior reservation first,
    /// so the new request is judged against the refreshed pool.
    pub fn set_connection_limit(&self, limit: u64, key: &str) {
        let mut budget = self.budget.lock().expect("budget lock poisoned");
        // Only an already-active pin currently holds pool bandwidth; a pin
        // restored by this activation was returned to the pool at unregister
        // time and is simply overwritten below.
        if self.registry.activate(key) == Activation::AlreadyActive {
            let record = self.registry.get(key);
            if record.has_individual_limit {
                budget.free = (budget.free + record.limit).min(budget.total);
            }
        }
        let effective = limit.min(budget.free);
        budget.free -= effective;
        self.registry.set_limit(key, effective);
    }

    /// Change the server budget to `limit`.
    ///
    /// Raising the budget grows the free pool. Lowering it shrinks the free
    /// pool first; when the pinned reservations alone no longer fit, every
    /// pin collapses to an equal floor share and the pool empties.
    pub fn set_server_limit(&self, limit: u64) {
        let mut budget = self.budget.lock().expect("budget lock poisoned");

        if limit >= budget.total {
            budget.free += limit - budget.total;
            budget.total = limit;
            return;
        }

        let pinned_sum = budget.total - budget.free;
        if pinned_sum <= limit {
            budget.free = limit - pinned_sum;
            budget.total = limit;
            return;
        }

        // Pins overflow the new budget: collapse them to equal floor shares.
        // pinned_sum > limit >= 0 implies at least one pinned connection.
        let share = limit / self.registry.count_individual() as u64;
        self.registry.update_individual_limits(share);
        budget.free = 0;
        budget.total = limit;
    }

    /// The rate the paced writer should apply to `key` right now.
    ///
    /// Inactive keys get 0. Pinned keys get their reservation. Everyone else
    /// splits the free pool evenly, rounded down so the sharers' sum never
    /// exceeds the pool.
    pub fn limit_for(&self, key: &str) -> u64 {
        let budget = self.budget.lock().expect("budget lock poisoned");

        let record = self.registry.get(key);
        if !record.active {
            return 0;
        }
        if record.has_individual_limit {
            return record.limit;
        }

        let sharers = self.registry.count_active() - self.registry.count_individual();
        if sharers == 0 {
            return 0;
        }
        budget.free / sharers as u64
    }

    /// Drive `src` into `dest` at the rate currently allowed for `key`.
    ///
    /// Each pacer window copies at most the limit read at its start, so a
    /// concurrent operator update applies from the next window on. When the
    /// throttler is disabled the remaining source is copied in one shot
    /// (still gated by one pacer tick). Returns the bytes delivered together
    /// with how the transfer ended; the caller owns both streams and is
    /// responsible for `unregister` once the conversation is over.
    pub async fn write<R, W>(
        &self,
        cancel: &CancellationToken,
        dest: &mut W,
        key: &str,
        src: &mut R,
    ) -> (u64, WriteOutcome)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut served = 0u64;
        self.register(key);

        loop {
            let limit = self.limit_for(key);
            if self.pacer.tick(cancel).await == Tick::Cancelled {
                return (served, WriteOutcome::Cancelled);
            }

            if !self.is_enabled() {
                return match tokio::io::copy(src, dest).await {
                    Ok(n) => (served + n, WriteOutcome::Completed),
                    Err(e) => (served, WriteOutcome::Failed(e)),
                };
            }

            let mut chunk = (&mut *src).take(limit);
            match tokio::io::copy(&mut chunk, dest).await {
                Ok(n) => {
                    served += n;
                    if n < limit {
                        return (served, WriteOutcome::Completed);
                    }
                }
                Err(e) => return (served, WriteOutcome::Failed(e)),
            }
        }
    }
}
