//! Bounded fixed-backoff retry for connectivity probes.
//!
//! Connection checks and model fetches each own an independent
//! [`RetryContext`]; exhausting one never affects the other. The backoff
//! is deliberately fixed rather than exponential: probes are cheap GETs
//! and the bound is small.

use std::time::Duration;

use colloquy_config::RetryConfig;

/// Retry policy for one probe kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before giving up, including the first.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1500),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then try again.
    RetryAfter(Duration),
    /// The attempt budget is spent; report the failure.
    GiveUp,
}

/// Attempt tracking for one probe cycle.
///
/// Dropped and rebuilt whenever the probe is re-issued or the provider
/// changes, which resets the count to zero.
#[derive(Debug)]
pub struct RetryContext {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryContext {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and decide what happens next.
    pub fn on_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.policy.backoff)
        }
    }

    /// Start a fresh cycle after a success.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
