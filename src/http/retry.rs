//! Exponential backoff for idempotent requests.

use std::time::Duration;

use crate::config::RetryConfig;

/// Retry policy applied to reads. Writes always get exactly one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, first try included
  pub max_attempts: u32,
  /// Delay before the first retry
  pub base_delay: Duration,
  /// Upper bound for any single delay
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

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  pub fn max_retries(&self) -> u32 {
    self.max_attempts.saturating_sub(1)
  }

  /// Delay before retry number `retry` (0-indexed): `base * 2^retry`, capped.
  pub fn delay_for_retry(&self, retry: u32) -> Duration {
    let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }
}
