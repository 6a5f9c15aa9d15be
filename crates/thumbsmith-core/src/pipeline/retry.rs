//! Bounded redelivery for transient task failures.
//!
//! Permanent failures are acknowledged immediately. Transient failures are
//! requeued with exponential backoff until the delivery attempt reaches the
//! policy bound, at which point they are escalated to permanent.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PipelineError;

/// How many times a task is delivered and how long to wait between tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// What to do with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Put the task back on the topic after `delay`.
    Requeue { delay: Duration },
    /// Acknowledge and report. `escalated` is set when a transient failure
    /// ran out of attempts.
    Discard { escalated: bool },
}

impl RetryPolicy {
    /// Decide the fate of delivery number `attempt` (1-based) that failed with `error`.
    pub fn disposition(&self, attempt: u32, error: &PipelineError) -> Disposition {
        if error.is_permanent() {
            return Disposition::Discard { escalated: false };
        }
        if attempt >= self.max_attempts {
            return Disposition::Discard { escalated: true };
        }
        Disposition::Requeue {
            delay: self.backoff(attempt),
        }
    }

    /// Delay before redelivering after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_duration(
            attempt.saturating_sub(1),
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        )
    }
}

/// Calculate exponential backoff duration for a given retry index.
///
/// Uses `base_delay * 2^retry` capped at `max_delay_ms`.
pub fn backoff_duration(retry: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(retry));
    Duration::from_millis(delay.min(max_delay_ms))
}
