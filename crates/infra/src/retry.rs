//! Retry policy for collaborator calls.
//!
//! The default policy retries forever with a fixed delay. There is no
//! timeout and no cancellation: a collaborator that stays down stalls the
//! caller indefinitely. Production deployments that prefer bounded latency
//! should inject a policy with `max_attempts` and a growing backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    #[default]
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first); `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Never give up, wait `delay` between attempts.
    pub fn forever(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// At most `max_attempts` attempts with a fixed delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::forever(delay)
        }
    }

    /// At most `max_attempts` attempts with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };

        match self.strategy {
            BackoffStrategy::Fixed => delay,
            _ => delay.min(self.max_delay),
        }
    }

    /// Check if another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// Every failure is logged with the operation name. With an unbounded
    /// policy this only ever returns `Ok`.
    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: core::fmt::Display,
    {
        let mut attempts = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempts = attempts.saturating_add(1);
                    if !self.should_retry(attempts) {
                        warn!(operation, attempts, error = %err, "giving up");
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(attempts);
                    warn!(operation, attempts, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
