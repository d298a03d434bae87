//! Retry logic with exponential backoff
//!
//! Host capabilities wrap their network operations in [`download_with_retry`].
//! The orchestrator itself never retries: a task that exhausts its capability
//! retries is marked failed and only re-runs through reconciliation.
//!
//! # Example
//!
//! ```no_run
//! use ingest_dl::retry::{IsRetryable, download_with_retry};
//! use ingest_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Busy,
//!     Gone,
//! }
//!
//! impl std::fmt::Display for FetchError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, FetchError::Busy)
//!     }
//! }
//!
//! # async fn example() -> Result<(), FetchError> {
//! let config = RetryConfig::default();
//! download_with_retry(&config, || async { Ok::<_, FetchError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, rate limiting, 5xx) return `true`.
/// Permanent failures (bad credentials, missing file, corrupt data) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Server-mandated wait before the next attempt, overriding the backoff delay
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::RateLimited { .. } => true,
            DownloadError::Http { status, .. } => *status >= 500 || *status == 408,
            // A short body usually means the connection dropped mid-transfer
            DownloadError::SizeMismatch { .. } => true,
            DownloadError::Auth(_)
            | DownloadError::NotFound(_)
            | DownloadError::Timeout { .. }
            | DownloadError::ScriptFailed { .. }
            | DownloadError::NoFiles => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DownloadError::RateLimited {
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Download(e) => e.is_retryable(),
            Error::ExternalTool(msg) => {
                msg.contains("timeout") || msg.contains("busy") || msg.contains("temporary")
            }
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::PostProcess(_)
            | Error::InvalidInput(_)
            | Error::NotFound(_)
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::NotSupported(_)
            | Error::Other(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Download(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs once, then up to `config.max_attempts` more times while
/// it keeps failing with retryable errors. Delays start at
/// `initial_delay`, grow by `backoff_multiplier` and are capped at
/// `max_delay`; a `retry_after` hint from the error replaces the computed
/// delay for that attempt.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                let wait = match e.retry_after() {
                    Some(hint) => hint.min(config.max_delay),
                    None if config.jitter => add_jitter(delay),
                    None => delay,
                };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = wait.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Spread a delay uniformly over `[delay, 2 * delay]`
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
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
        SlowDown(u64),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Permanent)
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                TestError::SlowDown(ms) => Some(Duration::from_millis(*ms)),
                _ => None,
            }
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = download_with_retry(&fast_config(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>("file.bin")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "file.bin");
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = download_with_retry(&fast_config(3), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = download_with_retry(&fast_config(2), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "initial + 2 retries");
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = download_with_retry(&fast_config(5), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let _ = download_with_retry(&fast_config(0), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 4.0,
            jitter: false,
        };

        let stamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let s = stamps.clone();

        let _ = download_with_retry(&config, || {
            let s = s.clone();
            async move {
                s.lock().await.push(std::time::Instant::now());
                Err::<(), _>(TestError::Transient)
            }
        })
        .await;

        let stamps = stamps.lock().await;
        assert_eq!(stamps.len(), 4);

        // 40ms, then min(160, 100) = 100ms twice
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(35), "first gap {:?}", gaps[0]);
        assert!(gaps[1] >= Duration::from_millis(90), "second gap {:?}", gaps[1]);
        for gap in &gaps {
            assert!(*gap < Duration::from_millis(400), "gap {gap:?} exceeds the cap");
        }
    }

    #[tokio::test]
    async fn test_retry_after_hint_overrides_backoff() {
        let config = RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = download_with_retry(&config, || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::SlowDown(20))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "hint should replace the 30s backoff"
        );
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(50);
        for _ in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay && jittered <= delay * 2);
        }
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_download_error_classification() {
        assert!(DownloadError::RateLimited { retry_after: None }.is_retryable());
        assert!(
            DownloadError::Http {
                status: 503,
                message: "busy".into()
            }
            .is_retryable()
        );
        assert!(
            !DownloadError::Http {
                status: 400,
                message: "bad".into()
            }
            .is_retryable()
        );
        assert!(!DownloadError::Auth("denied".into()).is_retryable());
        assert!(!DownloadError::NotFound("gone".into()).is_retryable());
        assert!(!DownloadError::NoFiles.is_retryable());

        let limited = Error::Download(DownloadError::RateLimited {
            retry_after: Some(9),
        });
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_io_error_classification() {
        let transient = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(transient.is_retryable());

        let permanent = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_permanent_error_variants() {
        assert!(!Error::InvalidInput("x".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
        assert!(!Error::ExternalTool("unrar: not found".into()).is_retryable());
        assert!(Error::ExternalTool("temporary failure".into()).is_retryable());
    }
}
