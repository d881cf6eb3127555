// Retry-with-backoff for segment fetches.
//
// Exponential backoff with bounded jitter, capped at a maximum delay. Whether an
// error deserves another attempt is decided by `HlsError::is_retryable`.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::HlsError;
use crate::config::FetcherConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every following one
    pub base_delay: Duration,
    /// Hard cap on any single delay, jitter included
    pub max_delay: Duration,
    /// Adds up to `base_delay / 2` of random delay
    pub jitter: bool,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // checked_shl saturates attempts >= 32 instead of overflowing
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let headroom = self.max_delay.saturating_sub(capped);
        let jitter_limit = (self.base_delay / 2).min(headroom);
        let limit_ms = u64::try_from(jitter_limit.as_millis()).unwrap_or(u64::MAX);
        if limit_ms == 0 {
            return capped;
        }

        capped + Duration::from_millis(rand::rng().random_range(0..limit_ms))
    }
}

impl From<&FetcherConfig> for RetryPolicy {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            max_retries: config.max_segment_retries,
            base_delay: config.segment_retry_delay_base,
            max_delay: config.segment_retry_max_delay,
            jitter: true,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. The closure receives the zero-based attempt.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, HlsError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, HlsError>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(HlsError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt = attempt + 1,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(HlsError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn transient() -> HlsError {
        HlsError::SegmentFetch {
            reason: "HTTP 503 Service Unavailable".to_string(),
            retryable: true,
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(700),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(700));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(700));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
            assert!(policy.delay_for_attempt(20) <= Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(3), &CancellationToken::new(), |attempt| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt < 2 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_attempted_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_backoff(&fast_policy(3), &CancellationToken::new(), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async {
                    Err(HlsError::SegmentFetch {
                        reason: "HTTP 404 Not Found".to_string(),
                        retryable: false,
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn budget_is_exhausted() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_backoff(&fast_policy(2), &CancellationToken::new(), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(HlsError::SegmentFetch { .. })));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn no_retry_policy_makes_a_single_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_backoff(&RetryPolicy::none(), &CancellationToken::new(), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result = retry_with_backoff(&fast_policy(3), &token, |_| async { Ok(1u32) }).await;
        assert!(matches!(result, Err(HlsError::Cancelled)));
    }
}
