//! Reconnection utilities for status/progress streams

use bulksend_core::SubscriptionConfig;
use tokio::time::Duration;

// ----------------------------------------------------------------------------
// Reconnect Policy
// ----------------------------------------------------------------------------

/// Reconnection strategy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Delay multiplier; 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Maximum consecutive attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&SubscriptionConfig::default())
    }
}

impl From<&SubscriptionConfig> for ReconnectPolicy {
    fn from(config: &SubscriptionConfig) -> Self {
        Self {
            initial_delay: config.reconnect_delay(),
            max_delay: config.max_delay(),
            backoff_multiplier: config.backoff_multiplier,
            max_attempts: Some(config.max_reconnect_attempts),
        }
    }
}

// ----------------------------------------------------------------------------
// Reconnect Manager
// ----------------------------------------------------------------------------

/// Tracks consecutive reconnect attempts of one subscription
#[derive(Debug)]
pub struct ReconnectManager {
    policy: ReconnectPolicy,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current_delay = policy.initial_delay;
        Self {
            policy,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_attempts) = self.policy.max_attempts {
            if self.attempt_count >= max_attempts {
                return None;
            }
        }

        let delay = self.current_delay;

        // Update for next attempt
        self.attempt_count += 1;
        let next_delay_millis =
            (self.current_delay.as_millis() as f64 * self.policy.backoff_multiplier) as u64;
        self.current_delay =
            Duration::from_millis(next_delay_millis.min(self.policy.max_delay.as_millis() as u64));

        Some(delay)
    }

    /// Reset the reconnection state (call once the channel confirms it is open)
    pub fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.attempt_count = 0;
    }

    /// Get current attempt count
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}
