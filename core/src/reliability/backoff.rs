/// Retry budget and timeout schedule

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Retransmissions after the first attempt
    pub max_retries: u32,
    /// Acknowledgment timeout of the first attempt (ms)
    pub base_timeout_ms: u64,
    /// Double the timeout on every retry
    pub use_exponential_backoff: bool,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_timeout_ms: 1_000,
            use_exponential_backoff: true,
        }
    }
}

impl ReliabilityConfig {
    /// Total send attempts, first try included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Acknowledgment timeout for 1-based `attempt`:
    /// `base * 2^(attempt-1)` with backoff, `base` without.
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return Duration::from_millis(self.base_timeout_ms);
        }
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_timeout_ms.saturating_mul(factor))
    }

    /// The waits that precede each retransmission.
    pub fn retry_schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries)
            .map(|attempt| self.timeout_for_attempt(attempt))
            .collect()
    }
}
