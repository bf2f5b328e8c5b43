use std::time::Duration;

use crate::market::errors::UpstreamError;

/// Retry and pacing rules applied around every upstream call.
///
/// Pure value; the stateful side lives in `RateController`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, first try included.
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub initial_delay: Duration,

    /// Inter-request delay a run starts with.
    pub base_request_delay: Duration,
    /// Ceiling for the escalated inter-request delay.
    pub max_request_delay: Duration,

    /// Rate-limit signals tolerated for one call before giving up.
    pub max_rate_limited_retries: u32,
}

impl RetryPolicy {
    /// Sleep before the transient retry with index `attempt_index`
    /// (0 for the first retry): `initial_delay * backoff_factor^attempt_index`.
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let exp = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Next inter-request delay after a rate-limit signal.
    pub fn escalate(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_request_delay)
    }

    pub fn is_retryable(&self, err: &UpstreamError) -> bool {
        matches!(err, UpstreamError::RateLimited | UpstreamError::Transient(_))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::config::CollectorConfig::default().retry_policy()
    }
}
