//! Exponential backoff for retryable connector calls

use crate::error::{Result, SyncError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry behaviour of one connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay, 0.0 to 1.0
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Same delay every time, no jitter
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_retries,
            initial_delay_ms: ms,
            max_delay_ms: ms,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.min(30) as i32 - 1;
        let base = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            let spread = base * jitter;
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retries are used up
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map a non-success HTTP status onto a classified error
pub fn status_error(status: u16, body: &str) -> SyncError {
    let snippet: String = body.chars().take(200).collect();
    SyncError::http(Some(status), snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            jitter: 0.0,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            jitter: 0.2,
            ..Default::default()
        };
        for _ in 0..50 {
            let ms = config.delay_for_attempt(1).as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::fixed(3, Duration::from_millis(10)), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::http(Some(503), "busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&RetryConfig::fixed(2, Duration::from_millis(10)), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(SyncError::http(Some(429), "slow down")) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "http");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&RetryConfig::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(SyncError::http(Some(422), "invalid field")) }
        })
        .await
        .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_error_truncates_body() {
        let err = status_error(500, &"x".repeat(1000));
        match err {
            SyncError::Http { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message.len(), 200);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
