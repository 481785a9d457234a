use std::future::Future;
use std::time::Duration;

use crate::errors::FetchError;

/// Exponential backoff: `min(base * 2^attempt, max_delay) + U(0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// HTTP-level policy for search backends: 3 attempts, 1s/2s/4s capped at
    /// 8s, plus up to a second of jitter.
    pub fn http_default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_secs(1),
        }
    }

    /// Scraper policy: 3 attempts with 1s then 2s between them.
    pub fn scraper_default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> RetryPolicy {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> RetryPolicy {
        self.base_delay = base_delay;
        self
    }

    /// Deterministic part of the wait after the failed attempt `attempt`
    /// (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.jitter.mul_f64(rand::random::<f64>())
        };
        self.backoff(attempt) + jitter
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    /// Returns the number of attempts consumed alongside the outcome.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> (u32, Result<T, FetchError>)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op(attempt).await {
                Ok(value) => return (attempt, Ok(value)),
                Err(err) => err,
            };
            if attempt >= max_attempts || !err.is_retryable() {
                return (attempt, Err(err));
            }
            let wait = self.delay_for(attempt - 1);
            log::warn!(
                "attempt {}/{} failed for {}: {}; retrying in {:.1}s",
                attempt,
                max_attempts,
                label,
                err,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::http_default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(40), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let policy = RetryPolicy::http_default();
        for _ in 0..100 {
            let wait = policy.delay_for(1);
            assert!(wait >= Duration::from_secs(2));
            assert!(wait <= Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhausts_attempts_on_retryable_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::scraper_default();
        let start = tokio::time::Instant::now();
        let (attempts, result): (u32, Result<(), FetchError>) = policy
            .run("test", |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE))
            })
            .await;
        assert_eq!(attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(result.is_err());
        // 1s after the first failure, 2s after the second.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_non_retryable_error() {
        let policy = RetryPolicy::scraper_default();
        let (attempts, result): (u32, Result<(), FetchError>) = policy
            .run("test", |_| async move { Err(FetchError::Status(StatusCode::NOT_FOUND)) })
            .await;
        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(FetchError::Status(StatusCode::NOT_FOUND))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_first_success() {
        let policy = RetryPolicy::scraper_default();
        let (attempts, result) = policy
            .run("test", |attempt| async move {
                if attempt < 2 {
                    Err(FetchError::EmptyContent)
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(attempts, 2);
        assert_eq!(result.ok(), Some(2));
    }
}
