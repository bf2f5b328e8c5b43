//! Adaptive pacing shared by every worker of a run.
//!
//! One `RateController` wraps all upstream calls. It sleeps the current
//! inter-request delay before each call, doubles that delay (capped) on
//! every rate-limit signal, and retries transient failures with
//! exponential backoff. The delay carries over between windows and
//! symbols and is reset only by `reset()` at the start of a run.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::market::errors::UpstreamError;
use crate::metrics::Counters;
use crate::rate::policy::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateState {
    pub current_delay: Duration,
    /// Failed calls (rate-limited or transient) since the last success.
    pub consecutive_failures: u32,
}

pub struct RateController {
    policy: RetryPolicy,
    state: Mutex<RateState>,
    counters: Counters,
}

impl RateController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_counters(policy, Counters::default())
    }

    pub fn with_counters(policy: RetryPolicy, counters: Counters) -> Self {
        let state = RateState {
            current_delay: policy.base_request_delay,
            consecutive_failures: 0,
        };
        Self {
            policy,
            state: Mutex::new(state),
            counters,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> RateState {
        *self.state.lock()
    }

    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.current_delay = self.policy.base_request_delay;
        s.consecutive_failures = 0;
    }

    /// Runs `call` under the pacing and retry rules.
    ///
    /// `Authentication` and `UnsupportedSymbol` return immediately.
    /// Transient failures are retried until `max_attempts`; rate-limit
    /// signals until `max_rate_limited_retries`. The last error is returned
    /// once a bound is reached.
    pub async fn execute<F, Fut, T>(&self, label: &str, mut call: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempts = 0u32;
        let mut rate_limited = 0u32;

        loop {
            let delay = self.state.lock().current_delay;
            if !delay.is_zero() {
                sleep(delay).await;
            }

            Counters::incr(&self.counters.upstream_calls);
            let err = match call().await {
                Ok(v) => {
                    self.state.lock().consecutive_failures = 0;
                    return Ok(v);
                }
                Err(e) => e,
            };

            match err {
                UpstreamError::RateLimited => {
                    rate_limited += 1;
                    let next = self.on_failure(true);
                    Counters::incr(&self.counters.rate_limited);

                    if rate_limited > self.policy.max_rate_limited_retries {
                        warn!(
                            call = label,
                            signals = rate_limited,
                            "rate limit retries exhausted"
                        );
                        return Err(UpstreamError::RateLimited);
                    }

                    warn!(
                        call = label,
                        delay_ms = next.as_millis() as u64,
                        "rate limited; escalating request delay"
                    );
                }
                UpstreamError::Transient(reason) => {
                    attempts += 1;
                    self.on_failure(false);

                    if attempts >= self.policy.max_attempts {
                        warn!(
                            call = label,
                            attempts,
                            %reason,
                            "transient retries exhausted"
                        );
                        return Err(UpstreamError::Transient(reason));
                    }

                    let backoff = self.policy.backoff_delay(attempts - 1);
                    Counters::incr(&self.counters.transient_retries);
                    debug!(
                        call = label,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        %reason,
                        "transient failure; backing off"
                    );
                    sleep(backoff).await;
                }
                fatal => return Err(fatal),
            }
        }
    }

    /// Records a failed call; escalates the shared delay on rate limits.
    /// Returns the delay now in effect.
    fn on_failure(&self, rate_limited: bool) -> Duration {
        let mut s = self.state.lock();
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        if rate_limited {
            s.current_delay = self.policy.escalate(s.current_delay);
        }
        s.current_delay
    }
}
