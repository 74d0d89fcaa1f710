//! Circuit breaker for the market data source.
//!
//! After `failure_threshold` consecutive fetch failures the breaker opens and
//! the orchestrator stops calling the source until the cooldown has passed.
//! Time is the tick time handed in by the caller, so replays trip and recover
//! at the same simulated instants.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { tripped_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    cooldown: Duration,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            cooldown,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a fetch may be attempted at `now`. Closes an expired breaker.
    pub fn is_allowed(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } => {
                if now - tripped_at >= self.cooldown {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true when this failure tripped the breaker.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold
            && self.state == BreakerState::Closed
        {
            self.state = BreakerState::Open { tripped_at: now };
            return true;
        }
        false
    }

    pub fn remaining_cooldown(&self, now: DateTime<Utc>) -> Duration {
        match self.state {
            BreakerState::Closed => Duration::zero(),
            BreakerState::Open { tripped_at } => {
                (self.cooldown - (now - tripped_at)).max(Duration::zero())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn starts_closed() {
        let mut cb = CircuitBreaker::new(3, Duration::minutes(5));
        assert!(cb.is_allowed(at(0)));
    }

    #[test]
    fn trips_after_threshold_failures() {
        let mut cb = CircuitBreaker::new(3, Duration::minutes(5));
        assert!(!cb.record_failure(at(0)));
        assert!(!cb.record_failure(at(1)));
        assert!(cb.is_allowed(at(1))); // 2 < 3
        assert!(cb.record_failure(at(2)));
        assert!(!cb.is_allowed(at(3))); // 3 >= 3 → tripped
        assert_eq!(cb.remaining_cooldown(at(3)), Duration::minutes(4));
    }

    #[test]
    fn success_resets_counter() {
        let mut cb = CircuitBreaker::new(3, Duration::minutes(5));
        cb.record_failure(at(0));
        cb.record_failure(at(1));
        cb.record_success();
        cb.record_failure(at(2)); // 1 failure after reset
        assert!(cb.is_allowed(at(2)));
    }

    #[test]
    fn expires_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, Duration::minutes(5));
        cb.record_failure(at(0));
        assert!(!cb.is_allowed(at(4)));
        assert!(cb.is_allowed(at(5))); // cooldown expired
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
