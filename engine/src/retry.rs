//! Exponential retry-delay computation, grounded on the teacher's
//! `dispatcher/retry.rs`: `baseDelay * 2^min(retryCost, maxExponent)`,
//! capped at a configured ceiling, with jitter applied by the caller before
//! sleeping.

use std::time::Duration;

pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_exponent: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_cost: u32) -> Duration {
        let exponent = retry_cost.min(self.max_exponent);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Adds up to 1 second of jitter, the same window the teacher's
    /// `Retry` iterator uses (`rand::random::<u16>() % 1000` ms).
    pub fn with_jitter(&self, retry_cost: u32) -> Duration {
        let jitter = Duration::from_millis(rand::random::<u16>() as u64 % 1000);
        self.delay_for(retry_cost) + jitter
    }
}
