//! Push channel reconnection backoff
//!
//! Delays grow as `base · 2^attempt` up to `cap`; after `max_attempts`
//! reconnections the channel is given up.

use std::time::Duration;

/// Default first delay
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Default delay cap
pub const BACKOFF_CAP_MS: u64 = 10_000;

/// Delay before reconnection number `attempt` (zero-based) with the default
/// base and cap: `min(1000 · 2^attempt, 10000)` ms.
pub fn backoff_delay(attempt: u32) -> Duration {
    scaled_delay(attempt, Duration::from_millis(BACKOFF_BASE_MS), Duration::from_millis(BACKOFF_CAP_MS))
}

fn scaled_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}

/// Reconnection state of the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconnect {
    /// Reconnections scheduled since the last successful open
    pub attempt: u32,

    /// Reconnections allowed before giving up
    pub max_attempts: u32,

    base: Duration,
    cap: Duration,
}

impl Reconnect {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base,
            cap,
        }
    }

    /// Delay before the next reconnection, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = scaled_delay(self.attempt, self.base, self.cap);
        self.attempt += 1;
        Some(delay)
    }

    /// Start over after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Default for Reconnect {
    fn default() -> Self {
        Self::new(
            5,
            Duration::from_millis(BACKOFF_BASE_MS),
            Duration::from_millis(BACKOFF_CAP_MS),
        )
    }
}
