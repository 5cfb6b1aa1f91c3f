//! Reconnect backoff.
//!
//! The attempt counter only resets once a link has stayed up for
//! `stable_after`; a server that accepts and immediately hangs up keeps
//! climbing the backoff curve instead of being redialled in a hot loop.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(5);

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Uptime after which a link counts as healthy and the backoff resets.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            stable_after: DEFAULT_STABLE_AFTER,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (0-based). Attempt 0 is immediate.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether a link that lived for `uptime` resets the attempt counter.
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= self.stable_after
    }
}
