//! Reconnection policy with a fixed exponential delay ladder
//!
//! Retries are unbounded; the delay is capped at the last rung and carries no jitter.

use std::time::Duration;

/// Delay ladder shared by both stream managers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_millis(&[1000, 2000, 4000, 8000, 16000])
    }
}

impl ReconnectPolicy {
    /// Build a ladder from millisecond values. An empty ladder falls back to the default.
    pub fn from_millis(delays: &[u64]) -> Self {
        if delays.is_empty() {
            return Self::default();
        }
        Self {
            delays: delays.iter().copied().map(Duration::from_millis).collect(),
        }
    }

    /// Delay for the given number of prior consecutive failures
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Per-manager attempt counter
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Select the delay for the next retry and count the attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Called only when a connection is actually established
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
