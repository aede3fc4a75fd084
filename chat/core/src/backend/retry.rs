//! Connection Retry
//!
//! Bounded exponential backoff for connection establishment. Only failures
//! that happen before any response bytes arrive are retried; everything
//! after the headers belongs to the stream and propagates immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Retry configuration for connection attempts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff delay
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Add up to 25% jitter on top of the computed delay
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration after failed attempt N (0-indexed)
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff_ms as f64 * f64::from(self.backoff_multiplier).powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            // Jitter only lengthens the delay
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)) as u64
        } else {
            capped as u64
        };

        Duration::from_millis(duration_ms)
    }

    /// Total attempts including the first
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Why a single connection attempt failed
#[derive(Debug)]
pub enum AttemptError {
    /// Connection-level failure (DNS, refused, connect timeout); retry
    Retryable(String),
    /// Anything else; give up immediately
    Fatal(TransportError),
}

/// Run `attempt` until it succeeds, fails fatally, or retries run out
///
/// Cancellation is observed before the first attempt, during each attempt
/// and during every backoff sleep, and is never retried.
///
/// # Errors
///
/// - [`TransportError::Cancelled`] if `cancel` fires
/// - [`TransportError::Connection`] once every attempt failed retryably
/// - the fatal error an attempt returned
pub async fn connect_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }

    let max_attempts = policy.max_attempts();
    let mut last_error = String::new();

    for n in 0..max_attempts {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = attempt(n) => result,
        };

        match result {
            Ok(value) => {
                if n > 0 {
                    tracing::info!(attempt = n + 1, "Connected after retry");
                }
                return Ok(value);
            }
            Err(AttemptError::Fatal(error)) => return Err(error),
            Err(AttemptError::Retryable(message)) => {
                last_error = message;
            }
        }

        if n + 1 < max_attempts {
            let delay = policy.backoff_for_attempt(n);
            tracing::warn!(
                attempt = n + 1,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Connection failed, retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(TransportError::Connection {
        attempts: max_attempts,
        message: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(4_000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 10.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_never_shortens() {
        let policy = RetryPolicy {
            use_jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = policy.backoff_for_attempt(1);
            assert!(delay >= Duration::from_millis(2_000));
            assert!(delay <= Duration::from_millis(2_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = connect_with_retry(&RetryPolicy::default(), &CancellationToken::new(), |_| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AttemptError::Retryable("connection refused".to_string()))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> =
            connect_with_retry(&RetryPolicy::default(), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Retryable("dns failure".to_string())) }
            })
            .await;

        assert_eq!(
            result,
            Err(TransportError::Connection {
                attempts: 4,
                message: "dns failure".to_string(),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s, no sleep after the last attempt
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            connect_with_retry(&RetryPolicy::default(), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AttemptError::Fatal(TransportError::Status {
                        status: 500,
                        message: "boom".to_string(),
                    }))
                }
            })
            .await;

        assert!(matches!(result, Err(TransportError::Status { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = connect_with_retry(&RetryPolicy::default(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert_eq!(result, Err(TransportError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_is_not_retried() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = connect_with_retry(&RetryPolicy::default(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Retryable("refused".to_string())) }
        })
        .await;

        assert_eq!(result, Err(TransportError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
