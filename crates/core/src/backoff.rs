//! Exponential backoff with optional full jitter.

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff. Each call to a delay method advances the
/// attempt counter; `reset` starts over after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Deterministic capped exponential delay.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Full-jitter delay: uniform over (0, current exponential delay].
    pub fn next_delay_jittered(&mut self) -> Duration {
        let ceiling = self.next_delay();
        let millis = ceiling.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(1..=millis))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn current(&self) -> Duration {
        // Shift capped to avoid overflow on long retry runs
        let exp = self.attempt.min(20);
        let scaled = self.base.saturating_mul(1u32 << exp);
        scaled.min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_below_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..50 {
            let ceiling = {
                let mut probe = backoff.clone();
                probe.next_delay()
            };
            let jittered = backoff.next_delay_jittered();
            assert!(jittered <= ceiling);
            assert!(jittered > Duration::ZERO);
        }
    }

    #[test]
    fn test_no_overflow_after_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..10_000 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
