//! Bounded retry with jittered exponential backoff

use rand::Rng;
use std::time::Duration;

use crate::classify::ErrorClass;
use crate::config::RetryConfig;
use crate::TransportError;

/// Decides whether and when a failed request is sent again
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter,
        }
    }

    /// Single attempt, never retries
    pub fn disabled() -> Self {
        Self::new(&RetryConfig::disabled())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether to send again after attempt number `attempt` (1-based) failed
    ///
    /// Authentication and authorization failures are never retried: the same
    /// credential would be rejected again.
    pub fn should_retry(&self, attempt: u32, error: &TransportError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        match ErrorClass::of_transport(error) {
            ErrorClass::Other => error.is_retryable(),
            ErrorClass::Authentication | ErrorClass::Authorization => false,
        }
    }

    /// Delay before the retry that follows attempt number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter {
            let millis = delay.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
