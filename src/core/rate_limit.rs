use std::time::{Duration, Instant};

use super::types::{GatewayError, GatewayResult};

/// Fixed-window limiter for outbound application commands.
///
/// Heartbeats, IDENTIFY and RESUME bypass it; they are part of keeping the session alive.
#[derive(Debug, Clone)]
pub struct CommandRateLimiter {
    max_per_window: u32,
    window: Duration,
    window_start: Instant,
    remaining: u32,
}

impl CommandRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            window_start: Instant::now(),
            remaining: max_per_window,
        }
    }

    fn reset_window(&mut self, now: Instant) {
        self.window_start = now;
        self.remaining = self.max_per_window;
    }

    fn time_until_reset(&self, now: Instant) -> Duration {
        self.window
            .checked_sub(now.saturating_duration_since(self.window_start))
            .unwrap_or(Duration::ZERO)
    }

    pub fn try_acquire(&mut self) -> GatewayResult<()> {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.reset_window(now);
        }

        if self.max_per_window == 0 {
            return Err(GatewayError::RateLimited {
                message: "rate limit configured for zero commands".to_string(),
                retry_after: Some(self.window),
            });
        }

        if self.remaining == 0 {
            let retry_after = self.time_until_reset(now);
            return Err(GatewayError::RateLimited {
                message: "outbound command limit exceeded".to_string(),
                retry_after: Some(retry_after),
            });
        }

        self.remaining = self.remaining.saturating_sub(1);
        Ok(())
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}
