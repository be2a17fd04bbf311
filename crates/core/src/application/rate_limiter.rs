//! Rate Limiter (Token Bucket)
//!
//! Gates claims per job type so outbound call rates stay bounded regardless of pool
//! concurrency. A bucket of `capacity` tokens refills at `refill_tokens` per
//! `refill_interval_ms`; each spent token comes back one regeneration period
//! (`capacity / refill_tokens` intervals) after it was spent. That keeps the long-run rate at
//! R per interval and guarantees at most C grants inside any window shorter than the period.

use crate::domain::RateLimitConfig;
use crate::port::TimeProvider;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Rate limiter using a token bucket with per-token regeneration
pub struct RateLimiter {
    capacity: usize,
    regen_ms: i64,
    time_provider: Arc<dyn TimeProvider>,
    // Regeneration due times of spent tokens, oldest first
    spent: Mutex<VecDeque<i64>>,
}

impl RateLimiter {
    /// Create a new rate limiter (bucket starts full)
    ///
    /// # Example
    /// Allow 1 claim/sec with a burst of 2:
    /// `RateLimiter::new(&RateLimitConfig::per_second(2, 1), clock)`
    pub fn new(config: &RateLimitConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        let capacity = config.capacity.max(1) as i64;
        let refill = config.refill_tokens.max(1) as i64;
        let regen_ms = (capacity * config.refill_interval_ms.max(1) as i64 + refill - 1) / refill;
        Self {
            capacity: capacity as usize,
            regen_ms,
            time_provider,
            spent: Mutex::new(VecDeque::with_capacity(capacity as usize)),
        }
    }

    /// Consume one token if available
    pub fn try_acquire(&self) -> bool {
        let now = self.time_provider.now_millis();
        let mut spent = self.lock();
        Self::regenerate(&mut spent, now);
        if spent.len() < self.capacity {
            spent.push_back(now + self.regen_ms);
            true
        } else {
            false
        }
    }

    /// Give back the most recently acquired token (claim found nothing to run)
    pub fn refund(&self) {
        self.lock().pop_back();
    }

    /// Time until the next token regenerates (zero if one is available)
    pub fn time_until_available(&self) -> Duration {
        let now = self.time_provider.now_millis();
        let mut spent = self.lock();
        Self::regenerate(&mut spent, now);
        if spent.len() < self.capacity {
            return Duration::ZERO;
        }
        spent
            .front()
            .map(|due| Duration::from_millis((*due - now).max(0) as u64))
            .unwrap_or(Duration::ZERO)
    }

    /// Tokens currently available (for monitoring)
    pub fn available(&self) -> usize {
        let now = self.time_provider.now_millis();
        let mut spent = self.lock();
        Self::regenerate(&mut spent, now);
        self.capacity - spent.len()
    }

    fn regenerate(spent: &mut VecDeque<i64>, now: i64) {
        while spent.front().is_some_and(|due| *due <= now) {
            spent.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<i64>> {
        // The queue is always left consistent, so a poisoned lock is still usable
        self.spent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
