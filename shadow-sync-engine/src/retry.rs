use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for re-attempting a `Retryable` failure
/// (spec §4.6). `initial`/`max` bound the delay; `max_attempts` bounds how
/// many times a strategy will retry a single request before treating it as
/// a skip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub multiplier: f64,
    /// Fractional jitter applied symmetrically around the computed delay,
    /// e.g. `0.1` means ±10%.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            max_attempts: 5,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before the `attempt`-th retry (1-based: `attempt == 1` is the
    /// delay before the first retry after the initial failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let unjittered = self.initial.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = unjittered.min(self.max.as_secs_f64());

        let mut rng = rand::thread_rng();
        let jitter_fraction = rng.gen_range(-self.jitter..=self.jitter);
        let jittered = (capped * (1.0 + jitter_fraction)).max(0.0);

        Duration::from_secs_f64(jittered)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
