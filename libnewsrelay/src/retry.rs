//! Bounded retry with exponential backoff
//!
//! One policy type, parameterized per operation (media download, media upload,
//! fetch). The delay before retrying after failed attempt `n` (1-based) is
//! `base_delay * factor^n`, so the media defaults wait 2s, then 4s.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::PlatformError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    #[serde(with = "crate::config::duration_str")]
    pub base_delay: Duration,
    pub factor: u32,
}

/// The fields of a `[retry.*]` config section that were actually set
///
/// Unset fields keep the value of the policy the section overrides, so a
/// partial `[retry.fetch]` still starts from the single-attempt fetch policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    #[serde(with = "crate::config::duration_str::option")]
    pub base_delay: Option<Duration>,
    pub factor: Option<u32>,
}

impl RetryOverrides {
    pub fn apply_to(self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay: self.base_delay.unwrap_or(base.base_delay),
            factor: self.factor.unwrap_or(base.factor),
        }
    }
}

impl RetryPolicy {
    /// 3 attempts, waiting 2^attempt seconds in between
    pub fn media_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            factor: 1,
        }
    }

    /// Retry without sleeping; used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1,
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the last error when every attempt failed.
    pub async fn run<F, Fut, T>(&self, op_name: &str, operation: F) -> Result<T, PlatformError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        self.run_when(op_name, PlatformError::is_retryable, operation).await
    }

    /// Like [`RetryPolicy::run`], with the caller deciding which errors are
    /// worth another attempt
    pub async fn run_when<F, Fut, T, P>(
        &self,
        op_name: &str,
        should_retry: P,
        operation: F,
    ) -> Result<T, PlatformError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
        P: Fn(&PlatformError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", op_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if should_retry(&e) && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed ({}/{}): {}. Retrying in {}s...",
                        op_name,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_secs()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt == max_attempts && max_attempts > 1 {
                        warn!("{} failed after {} attempts: {}", op_name, max_attempts, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_overrides_keep_unset_fields_of_base() {
        let overrides = RetryOverrides {
            base_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let policy = overrides.apply_to(RetryPolicy::none());
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
        assert_eq!(policy.factor, 1);

        let policy = RetryOverrides::default().apply_to(RetryPolicy::media_default());
        assert_eq!(policy, RetryPolicy::media_default());
    }

    #[test]
    fn test_media_default_delays_are_powers_of_two() {
        let policy = RetryPolicy::media_default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy {
            max_attempts: 100,
            base_delay: Duration::from_secs(1),
            factor: 10,
        };
        assert!(policy.delay_after(40) >= Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("download", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(PlatformError::Network("reset".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("upload", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::Api {
                    status: 503,
                    message: "over capacity".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("download", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::NotFound("media gone".into()))
            })
            .await;

        assert_eq!(result.unwrap_err(), PlatformError::NotFound("media gone".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_when_custom_predicate() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run_when(
                "fetch",
                |e| !matches!(e, PlatformError::RateLimit(_)),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::RateLimit("429".into()))
                },
            )
            .await;

        assert!(matches!(result, Err(PlatformError::RateLimit(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let calls = AtomicU32::new(0);
        let _ = RetryPolicy::none()
            .run("fetch", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PlatformError::Network("down".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
