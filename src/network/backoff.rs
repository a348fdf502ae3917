use std::time::Duration;

use rand::Rng;

/// Decides how long to wait before each reconnection attempt
pub trait Backoff: Send + Sync + 'static {
    /// Delay before attempt number `attempt` (1-based, reset after every
    /// successful connection)
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Waits the same interval before every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    interval: Duration,
}

impl FixedBackoff {
    /// Creates a fixed backoff
    pub fn new(interval: Duration) -> Self {
        FixedBackoff { interval }
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// Doubles the delay after every failed attempt, up to a ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Creates an exponential backoff starting at `base` and capped at `max`
    pub fn new(base: Duration, max: Duration) -> Self {
        ExponentialBackoff {
            base,
            max: max.max(base),
            jitter: 0.0,
        }
    }

    /// Spreads each delay uniformly by up to `fraction` of itself (0.0..=1.0)
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    fn undithered(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.undithered(attempt);
        if self.jitter == 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64(1.0 + spread).min(self.max)
    }
}
