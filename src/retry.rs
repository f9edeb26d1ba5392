use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::{KeycloakError, Result};

/// Exponential backoff for transient failures (transport errors, 5xx, 429).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("Attempt {} succeeded", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.after_failure(attempt, e)?;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Decide what to do after failed attempt number `attempt`: the delay
    /// before the next one, or the error to give up with.
    fn after_failure(&self, attempt: u32, e: KeycloakError) -> Result<Duration> {
        if !e.is_retryable() {
            return Err(e);
        }
        warn!("Attempt {} failed: {}", attempt, e);
        if attempt > self.max_retries {
            return Err(KeycloakError::RetriesExhausted {
                attempts: attempt,
                last: e.to_string(),
            });
        }
        Ok(self.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> KeycloakError {
        KeycloakError::Http { status: 503, message: "unavailable".into() }
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = &AtomicU32::new(0);
        let value = fast(3)
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("ok")
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let err = fast(2)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, KeycloakError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let calls = &AtomicU32::new(0);
        let err = fast(5)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(KeycloakError::Http { status: 401, message: "invalid_grant".into() })
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn no_retry_policy_makes_one_attempt() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::none()
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, KeycloakError::RetriesExhausted { attempts: 1, .. }));
    }
}
