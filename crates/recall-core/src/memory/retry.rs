//! ============================================================================
//! Retry Logic - Exponential backoff for transient memory failures
//! ============================================================================
//! Provides:
//! - Exponential backoff with jitter between attempts
//! - A bounded attempt count; exhaustion returns the last error
//! - Per-attempt timeouts that count as transient failures
//! ============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::MemoryError;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay between retries (multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = policy.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(policy.max_delay_ms);

    let final_delay = if policy.jitter {
        // 0-50% on top of the capped delay
        let jitter_factor = 1.0 + rand::thread_rng().gen::<f64>() * 0.5;
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, MemoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MemoryError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = calculate_delay(attempt - 1, policy);
            debug!("{}: retry attempt {} after {:?} delay", operation, attempt, delay);
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                warn!(
                    "{}: attempt {}/{} failed: {}",
                    operation,
                    attempt + 1,
                    max_attempts,
                    e
                );
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        "{}: giving up after {} attempts: {}",
                        operation, max_attempts, e
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Bound a single external call. Elapsed time maps to the given transient error.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    fut: Fut,
    on_timeout: impl FnOnce() -> MemoryError,
) -> Result<T, MemoryError>
where
    Fut: Future<Output = Result<T, MemoryError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    #[test]
    fn test_calculate_delay() {
        let policy = RetryPolicy {
            jitter: false,
            base_delay_ms: 500,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &policy), Duration::from_millis(500));
        assert_eq!(calculate_delay(1, &policy), Duration::from_millis(1000));
        assert_eq!(calculate_delay(2, &policy), Duration::from_millis(2000));
        assert_eq!(calculate_delay(3, &policy), Duration::from_millis(4000));
        assert_eq!(calculate_delay(10, &policy), Duration::from_millis(10000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let policy = RetryPolicy {
            jitter: true,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            ..Default::default()
        };

        for _ in 0..10 {
            let delay = calculate_delay(0, &policy);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_calculate_delay_no_overflow() {
        let policy = RetryPolicy {
            jitter: false,
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: 5000,
            ..Default::default()
        };
        assert_eq!(calculate_delay(200, &policy), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry("test", &fast_policy(5), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(MemoryError::StoreUnavailable("down".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry("test", &fast_policy(3), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MemoryError::StoreUnavailable("still down".into()))
        })
        .await;

        assert!(matches!(result, Err(MemoryError::StoreUnavailable(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry("test", &fast_policy(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MemoryError::InvalidInput("empty".into()))
        })
        .await;

        assert!(matches!(result, Err(MemoryError::InvalidInput(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let result: Result<(), _> = with_timeout(
            Duration::from_millis(10),
            async {
                sleep(Duration::from_millis(500)).await;
                Ok(())
            },
            || MemoryError::StoreUnavailable("timed out".into()),
        )
        .await;

        assert!(matches!(result, Err(MemoryError::StoreUnavailable(_))));
    }
}
