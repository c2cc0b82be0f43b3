//! Reconnection delay policies.
//!
//! The liveness monitor asks the policy for the delay before reconnect attempt `n`
//! (0-indexed). `None` means the attempt budget is spent and the session fails.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay schedule for supervised reconnects.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before reconnect attempt `attempt` (0-indexed), or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Attempt budget; `None` is unlimited.
    fn max_attempts(&self) -> Option<u32>;

    /// Whether attempt `attempt` (0-indexed) is still within budget.
    fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_attempts().is_none_or(|max| attempt < max)
    }
}

/// Which policy the configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Doubling delay, capped.
    Exponential,
}

/// Always waits the same amount of time between attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    #[allow(missing_docs)]
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self { delay, max_attempts }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.should_reconnect(attempt).then_some(self.delay)
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// `initial * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    #[allow(missing_docs)]
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}
