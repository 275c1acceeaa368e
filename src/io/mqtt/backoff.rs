// src/io/mqtt/backoff.rs
//
// Reconnect delays: exponential growth capped at a maximum, with jitter so a
// fleet of bridges does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Delay before the next attempt: uniform in `[ceiling / 2, ceiling]` where
    /// the ceiling doubles per attempt up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        if ceiling_ms == 0 {
            return ceiling;
        }
        let floor_ms = ceiling_ms / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor_ms..=ceiling_ms))
    }

    /// Attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn ceiling(&self) -> Duration {
        // 2^31 already exceeds any sane maximum
        let factor = 1u32 << self.attempt.min(31);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));

        let expected_ceilings = [100, 200, 400, 800, 1000, 1000, 1000];
        for ceiling in expected_ceilings {
            let delay = backoff.next_delay().as_millis() as u64;
            assert!(delay <= ceiling, "{} > {}", delay, ceiling);
            assert!(delay >= ceiling / 2, "{} < {}", delay, ceiling / 2);
        }
        assert_eq!(backoff.attempt(), 7);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        for _ in 0..10 {
            backoff.next_delay();
        }
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_zero_initial_delay() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
