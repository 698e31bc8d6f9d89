//! Bounded retry with explicit outcomes
//!
//! Page images and whole chapters are retried a fixed number of times with a
//! delay between attempts. The loop reports how it ended through
//! [`RetryOutcome`] instead of leaving the caller to infer it from an error.
//!
//! # Example
//!
//! ```no_run
//! use manga_tracker::retry::{IsRetryable, RetryOutcome, run_with_retry};
//! use manga_tracker::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! match run_with_retry(&config, || async { Ok::<_, MyError>(()) }).await {
//!     RetryOutcome::Succeeded { attempts, .. } => println!("done after {attempts}"),
//!     RetryOutcome::Exhausted { error, .. } => println!("gave up: {error}"),
//!     RetryOutcome::Fatal { error, .. } => println!("permanent: {error}"),
//! }
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, throttling, a challenge page, a placeholder image) return `true`.
/// Configuration, persistence and watermark errors return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Error::HttpStatus { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // challenge pages and lazy-loading placeholders usually clear up on a later attempt
            Error::AntiBot { .. } => true,
            Error::Integrity(_) => true,
            Error::Parse(_) => true,
            Error::Browser(_) => true,
            Error::Config { .. }
            | Error::UnknownSite(_)
            | Error::MissingField { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Watermark(_)
            | Error::Serialization(_)
            | Error::NotFound(_)
            | Error::Other(_) => false,
        }
    }
}

/// How a bounded retry loop ended
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation produced a value
    Succeeded {
        /// Value returned by the successful attempt
        value: T,
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Error from the last attempt
        error: E,
        /// Attempts used
        attempts: u32,
    },
    /// An attempt failed with an error that retrying cannot fix
    Fatal {
        /// The non-retryable error
        error: E,
        /// Attempts used, including the failing one
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts the loop made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Fatal { attempts, .. } => *attempts,
        }
    }

    /// Collapse into a plain `Result`
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } | RetryOutcome::Fatal { error, .. } => Err(error),
        }
    }
}

/// Execute an async operation at most `config.max_attempts` times
///
/// A non-retryable error ends the loop immediately with [`RetryOutcome::Fatal`].
/// The delay starts at `initial_delay`, is multiplied by `backoff_multiplier`
/// after each failure and never exceeds `max_delay`. A `max_attempts` of zero
/// is treated as one attempt.
pub async fn run_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) if !error.is_retryable() => {
                tracing::error!(error = %error, attempts = attempt, "Operation failed with non-retryable error");
                return RetryOutcome::Fatal {
                    error,
                    attempts: attempt,
                };
            }
            Err(error) if attempt >= max_attempts => {
                tracing::error!(
                    error = %error,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return RetryOutcome::Exhausted {
                    error,
                    attempts: attempt,
                };
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
        }
    }
}

/// [`run_with_retry`] collapsed into a `Result`
pub async fn download_with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    run_with_retry(config, operation).await.into_result()
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, WatermarkError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = run_with_retry(&fast(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Succeeded {
                value: 42,
                attempts: 1
            }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = run_with_retry(&fast(5), || {
            let counter = counter_clone.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn max_attempts_counts_total_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = run_with_retry(&fast(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                error: TestError::Transient,
                attempts: 5
            }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 5, "image is attempted 5 times, not 6");
    }

    #[tokio::test]
    async fn permanent_error_is_fatal_without_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = run_with_retry(&fast(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Fatal {
                error: TestError::Permanent,
                attempts: 1
            }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_max_attempts_still_tries_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = download_with_retry(&fast(0), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fixed_delay_between_attempts() {
        let config = RetryConfig::fixed(3, Duration::from_millis(40));
        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _ = run_with_retry(&config, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 3);
        for pair in ts.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(35), "gap was {:?}", gap);
            assert!(gap < Duration::from_secs(1), "gap was {:?}", gap);
        }
    }

    #[tokio::test]
    async fn delays_are_capped_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(60),
            backoff_multiplier: 10.0,
            jitter: false,
        };
        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _ = run_with_retry(&config, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4);
        let last_gap = ts[3].duration_since(ts[2]);
        assert!(last_gap >= Duration::from_millis(50), "gap was {:?}", last_gap);
        assert!(last_gap < Duration::from_millis(400), "gap was {:?}", last_gap);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?}");
            assert!(jittered <= delay * 2, "iteration {i}: {jittered:?}");
        }
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn source_failures_are_retryable() {
        assert!(
            Error::HttpStatus {
                status: 503,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(
            Error::HttpStatus {
                status: 429,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(Error::AntiBot { url: "u".into() }.is_retryable());
        assert!(Error::Integrity("loading.gif".into()).is_retryable());
        assert!(
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset"
            ))
            .is_retryable()
        );
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(
            !Error::HttpStatus {
                status: 404,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::Config {
                message: "bad".into(),
                key: None
            }
            .is_retryable()
        );
        assert!(!Error::Database(DatabaseError::QueryFailed("x".into())).is_retryable());
        assert!(
            !Error::Watermark(WatermarkError::ResumeUrlNotFound { url: "u".into() })
                .is_retryable()
        );
        assert!(
            !Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied"
            ))
            .is_retryable()
        );
    }
}
