//! Minimum-interval gate for calls to one external service.
//!
//! The limiter itself holds no lock and never sleeps: `reserve` books the
//! next free slot and returns how long the caller must wait for it. Callers
//! that share a limiter across threads keep it behind their own mutex and
//! sleep after releasing it (see `enrich::gate`).

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_slot: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            last_slot: None,
        }
    }

    /// Book the next call slot at or after `now`.
    ///
    /// Slots are spaced at least `interval` apart even when several callers
    /// reserve before any of them has slept, so concurrent workers queue up
    /// instead of bursting.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        let slot = match self.last_slot {
            Some(last) => {
                let earliest = last + self.interval;
                if earliest > now { earliest } else { now }
            }
            None => now,
        };

        self.last_slot = Some(slot);
        slot.saturating_duration_since(now)
    }
}
