use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Classification of upstream failures for retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Provider-signalled backpressure. Never retried here; the caller owns
    /// the rate-limit policy (honoring the provider delay, requeueing, ...).
    RateLimit,
    /// Network hiccup or 5xx - retry with the configured delays
    Transient,
    /// Anything else - surface immediately
    Permanent,
}

/// Configuration for the bounded inner retry of a single operation
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,
    /// Delay per retry attempt in milliseconds; the last entry repeats if
    /// attempts outnumber entries
    pub delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delays_ms: vec![300, 600],
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self
            .delays_ms
            .get(attempt as usize)
            .or_else(|| self.delays_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// Retry an async operation, re-attempting only failures the classifier
/// marks `Transient`. Rate-limit and permanent failures return on first
/// occurrence so the caller can apply its own policy.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    classify_error: impl Fn(&E) -> RetryKind,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retry attempts", attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                match classify_error(&e) {
                    RetryKind::Transient => {}
                    kind => {
                        debug!("Operation failed with non-retryable error ({:?}): {}", kind, e);
                        return Err(e);
                    }
                }

                if attempt >= config.max_attempts {
                    error!(
                        "Operation failed after {} attempts (max retries exhausted): {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                warn!(
                    "Operation failed (attempt {}/{}): {} - retrying in {}ms",
                    attempt + 1,
                    config.max_attempts + 1,
                    e,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestError {
        kind: &'static str,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.kind)
        }
    }

    fn classify(e: &TestError) -> RetryKind {
        match e.kind {
            "transient" => RetryKind::Transient,
            "rate_limit" => RetryKind::RateLimit,
            _ => RetryKind::Permanent,
        }
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let result = retry_with_backoff(
            || async { Ok::<_, TestError>(42) },
            &RetryConfig::default(),
            classify,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = std::cell::Cell::new(0);
        let result = retry_with_backoff(
            || async {
                attempts.set(attempts.get() + 1);
                Err::<i32, _>(TestError { kind: "fatal" })
            },
            &RetryConfig::default(),
            classify,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_immediately() {
        let attempts = std::cell::Cell::new(0);
        let result = retry_with_backoff(
            || async {
                attempts.set(attempts.get() + 1);
                Err::<i32, _>(TestError { kind: "rate_limit" })
            },
            &RetryConfig {
                max_attempts: 3,
                delays_ms: vec![10],
            },
            classify,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let attempts = std::cell::Cell::new(0);
        let result = retry_with_backoff(
            || async {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err(TestError { kind: "transient" })
                } else {
                    Ok(42)
                }
            },
            &RetryConfig {
                max_attempts: 3,
                delays_ms: vec![10, 20, 30],
            },
            classify,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let attempts = std::cell::Cell::new(0);
        let result = retry_with_backoff(
            || async {
                attempts.set(attempts.get() + 1);
                Err::<i32, _>(TestError { kind: "transient" })
            },
            &RetryConfig {
                max_attempts: 2,
                delays_ms: vec![10, 20],
            },
            classify,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn test_delay_table_repeats_last_entry() {
        let config = RetryConfig {
            max_attempts: 5,
            delays_ms: vec![10, 20],
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(10));
        assert_eq!(config.delay_for(1), Duration::from_millis(20));
        assert_eq!(config.delay_for(4), Duration::from_millis(20));
    }
}
