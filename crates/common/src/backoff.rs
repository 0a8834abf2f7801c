use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for retrying collaborator calls.
///
/// Each call to [`next_delay`](ExponentialBackoff::next_delay) doubles the
/// delay up to `max_delay`, then adds a random jitter of up to
/// `jitter_factor` of the capped delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.1)
    }
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base`, capped at `max_delay`.
    ///
    /// `jitter_factor` is a fraction of the delay in `[0.0, 1.0]`; negative
    /// values are clamped to zero.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.max(0.0),
            attempt: 0,
        }
    }

    /// Return the delay for the current attempt and advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let doubled = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = doubled.min(self.max_delay);

        let jitter = if self.jitter_factor > 0.0 {
            let span = capped.as_secs_f64() * self.jitter_factor;
            rand::thread_rng().gen_range(0.0..=span)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);

        Duration::from_secs_f64(capped.as_secs_f64() + jitter)
    }

    /// Reset the attempt counter after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
