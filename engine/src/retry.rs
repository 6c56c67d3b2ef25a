//! Retry policy and a generic retry helper.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
pub(crate) fn delay_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor applied per retry
    pub multiplier: u32,
    /// Upper bound on any single delay
    pub cap: Duration,
}

impl RetryPolicy {
    /// Backoff for live replication: 1s, 3s, 9s, 27s, then 60s forever.
    pub const fn live_session() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(1_000),
            multiplier: 3,
            cap: Duration::from_millis(60_000),
        }
    }

    /// Immediate retries for optimistic write conflicts.
    pub const fn write_conflict(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay: Duration::ZERO,
            multiplier: 1,
            cap: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            failures: 0,
        }
    }
}

/// Stateful walk through a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    /// Record a failure and return how long to wait, or `None` when the
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        match self.policy.max_attempts {
            Some(max) if self.failures >= max => None,
            _ => Some(self.policy.delay_for(self.failures)),
        }
    }

    /// Forget past failures after a success.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy gives up. `op` receives the 1-based attempt number.
pub async fn retry<T, F, Fut, P>(policy: &RetryPolicy, mut op: F, retryable: P) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut backoff = policy.backoff();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!(attempt, delay_ms = delay_millis(delay), "Retrying: {}", e);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn live_session_delays() {
        let policy = RetryPolicy::live_session();
        let delays: Vec<u64> = (1..=7)
            .map(|n| delay_millis(policy.delay_for(n)))
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 3_000, 9_000, 27_000, 60_000, 60_000, 60_000]
        );
    }

    #[test]
    fn delay_millis_saturates() {
        assert_eq!(delay_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(delay_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn huge_retry_counts_stay_capped() {
        let policy = RetryPolicy::live_session();
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn backoff_respects_attempt_budget() {
        let mut backoff = RetryPolicy::write_conflict(3).backoff();
        assert_eq!(backoff.next_delay(), Some(Duration::ZERO));
        assert_eq!(backoff.next_delay(), Some(Duration::ZERO));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn backoff_reset() {
        let mut backoff = RetryPolicy::live_session().backoff();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.failures(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn retry_stops_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            &RetryPolicy::write_conflict(3),
            |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Connectivity("down".into()))
            },
            Error::is_transient,
        )
        .await;

        assert!(matches!(result, Err(Error::Connectivity(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            &RetryPolicy::write_conflict(3),
            |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Denied("nope".into()))
            },
            Error::is_transient,
        )
        .await;

        assert!(matches!(result, Err(Error::Denied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let value = retry(
            &RetryPolicy::live_session(),
            |attempt| async move {
                if attempt < 3 {
                    Err(Error::Connectivity("down".into()))
                } else {
                    Ok(attempt)
                }
            },
            Error::is_transient,
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
