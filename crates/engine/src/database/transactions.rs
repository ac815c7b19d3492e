//! Retry policy for conflicting transactions
//!
//! Table-granular validation makes conflicts between writers of the same
//! table routine. `RetryConfig` controls how often `transaction_with_retry`
//! runs the closure again and how long it backs off in between.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry behavior for `Database::transaction_with_retry`
///
/// # Example
/// ```ignore
/// let retry = RetryConfig::new().with_max_retries(5).with_max_delay_ms(200);
/// db.transaction_with_retry(&retry, |txn| { ... })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Run once, never retry
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Backoff before retry number `attempt + 1`
    pub(crate) fn calculate_delay(&self, attempt: usize) -> Duration {
        let multiplier = 1u64.checked_shl(attempt.min(63) as u32).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
