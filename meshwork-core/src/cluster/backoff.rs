//! Stateless exponential backoff with optional jitter

use rand::Rng;
use std::time::Duration;

use crate::config::DEFAULT_BACKOFF_JITTER_FRACTION;

/// Delay calculator. The caller owns the attempt counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = if self.factor.is_finite() { self.factor.max(1.0) } else { 1.0 };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * factor.powi(exponent);
        let max = self.max.max(self.initial);
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay before retry number `attempt`, spread by +/-20% when jitter is on
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let spread = rng.gen_range(-DEFAULT_BACKOFF_JITTER_FRACTION..=DEFAULT_BACKOFF_JITTER_FRACTION);
        base.mul_f64(1.0 + spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: bool) -> Backoff {
        Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_capped() {
        let b = backoff(false);
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(800));
        assert_eq!(b.delay(5), Duration::from_secs(2));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let b = backoff(true);
        for attempt in 0..6 {
            let base = b.base_delay(attempt);
            for _ in 0..50 {
                let d = b.delay(attempt);
                assert!(d >= base.mul_f64(0.79) && d <= base.mul_f64(1.21), "{:?} vs {:?}", d, base);
            }
        }
    }

    #[test]
    fn test_same_inputs_same_output() {
        let b = backoff(false);
        assert_eq!(b.delay(4), b.delay(4));
    }
}
