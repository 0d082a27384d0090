use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Request quota shared by every fetch task of a run.
///
/// Callers hold an `Arc<RequestBudget>`; all OpenDota and Stratz requests
/// draw from the same limiter, so concurrent workers never exceed `limit`
/// requests per `window`.
pub struct RequestBudget {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
    issued: AtomicU64,
}

impl RequestBudget {
    /// Allows bursts of up to `limit` requests, refilling one slot every
    /// `window / limit`.
    pub fn new(limit: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
            issued: AtomicU64::new(0),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Blocks until a request slot is available, then consumes it.
    pub fn acquire(&self) {
        while let Some(wait) = self.try_acquire() {
            thread::sleep(wait);
        }
    }

    /// Consumes a slot if one is free; otherwise returns how long until the
    /// next one is.
    pub fn try_acquire(&self) -> Option<Duration> {
        match self.limiter.check() {
            Ok(()) => {
                self.issued.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(not_until) => Some(
                not_until
                    .wait_time_from(self.clock.now())
                    .max(Duration::from_millis(1)),
            ),
        }
    }

    pub fn requests_issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RequestBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBudget")
            .field("issued", &self.requests_issued())
            .finish_non_exhaustive()
    }
}
