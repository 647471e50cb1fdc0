use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::time::Duration;

use super::types::ReconnectStrategy;

/// Exponential backoff between reconnect attempts, with an optional attempt cap.
///
/// Policy lives here rather than in the gateway actor so callers can tune base/max/factor.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffReconnect {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ExponentialBackoffReconnect {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            2.0
        };
        Self {
            base,
            max,
            factor,
            current: base,
            max_attempts: None,
            attempts: 0,
        }
    }

    /// Give up after `attempts` consecutive reconnects without a successful handshake.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ExponentialBackoffReconnect {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

impl ReconnectStrategy for ExponentialBackoffReconnect {
    fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.current;
        let next = (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
        self.current = Duration::from_secs_f64(next);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }

    fn should_retry(&self) -> bool {
        self.max_attempts.is_none_or(|max| self.attempts < max)
    }
}

/// Spread reconnects over `[base/2, base]` so many clients do not reconnect in lockstep.
pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }

    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(0.5..=1.0);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
