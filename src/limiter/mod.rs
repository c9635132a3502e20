//! Global token-bucket rate limiter
//!
//! The bucket holds at most one second's worth of tokens (`capacity` equals
//! the refill rate) and starts full. [`RateLimiter::try_acquire`] never waits:
//! a `false` answer means the caller drops the work.

use crate::clock::{Clock, SystemClock};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket admitting at most `rate` operations per second
pub struct RateLimiter {
    rate: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter reading time from the system clock
    pub fn new(rate_per_second: f64) -> Self {
        Self::with_clock(rate_per_second, Arc::new(SystemClock))
    }

    /// Creates a limiter reading time from `clock`
    pub fn with_clock(rate_per_second: f64, clock: Arc<dyn Clock>) -> Self {
        let rate = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            rate_per_second
        } else {
            0.0
        };

        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: clock.now(),
            }),
            clock,
        }
    }

    /// Maximum number of tokens the bucket can bank
    pub fn capacity(&self) -> f64 {
        self.rate
    }

    /// Takes one token if available
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        self.try_acquire_at(now)
    }

    /// Takes one token if available, treating `now` as the current time
    ///
    /// The outcome depends only on the bucket state and `now`. An instant
    /// earlier than the last refill counts as zero elapsed time.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let elapsed = now.saturating_duration_since(state.last_refill);
        if now > state.last_refill {
            state.last_refill = now;
        }

        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.rate);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn limiter(rate: f64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimiter::with_clock(rate, clock.clone()), clock)
    }

    #[test]
    fn test_burst_then_reject() {
        let (limiter, _clock) = limiter(2.0);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill_after_wait() {
        let (limiter, clock) = limiter(2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // 600ms at 2 tokens/s regains 1.2 tokens
        clock.advance(Duration::from_millis(600));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let (limiter, clock) = limiter(3.0);

        // A long idle period must not bank more than one second's worth
        clock.advance(Duration::from_secs(60));

        let admitted = (0..10).filter(|_| limiter.try_acquire()).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_partial_refill_bounds() {
        let rate = 10.0;
        let (limiter, clock) = limiter(rate);
        while limiter.try_acquire() {}

        // After dt seconds at least floor(dt * C) and at most C succeed
        clock.advance(Duration::from_millis(450));
        let admitted = (0..20).filter(|_| limiter.try_acquire()).count();
        assert!(admitted >= 4, "admitted {}", admitted);
        assert!(admitted <= rate as usize);
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let (limiter, clock) = limiter(1.0);
        assert!(limiter.try_acquire());

        clock.advance(Duration::from_millis(500));
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_millis(500));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_try_acquire_at_is_deterministic() {
        let (limiter, clock) = limiter(2.0);
        let t0 = clock.now();

        assert!(limiter.try_acquire_at(t0));
        assert!(limiter.try_acquire_at(t0));
        assert!(!limiter.try_acquire_at(t0));
        assert!(limiter.try_acquire_at(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_time_going_backwards_is_ignored() {
        let (limiter, clock) = limiter(1.0);
        let later = clock.now() + Duration::from_secs(1);
        assert!(limiter.try_acquire_at(later));

        // An older instant refills nothing
        assert!(!limiter.try_acquire_at(later - Duration::from_millis(900)));
    }

    #[test]
    fn test_invalid_rate_admits_nothing() {
        let (limiter, clock) = limiter(0.0);
        clock.advance(Duration::from_secs(10));
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.capacity(), 0.0);
    }
}
