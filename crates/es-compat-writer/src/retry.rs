//! Backoff for whole bulk requests
//!
//! Only overload (429, 503 or a rejected-execution signal) is retried here.
//! Per-document retries go through the next batch instead.

use es_compat_core::config::BackoffConfig;
use es_compat_core::prelude::*;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.multiplier,
        }
    }

    /// No waiting, single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before attempt `attempt + 1`; `attempt` counts from 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// Run `op` until it succeeds, fails for a non-overload reason, or
    /// attempts run out
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(e) if e.is_retryable() && self.should_retry(attempt) => {
                    let delay = self.delay(attempt);
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Cluster overloaded, backing off");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
