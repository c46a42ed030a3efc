//! Request rate limiting for destination APIs
//!
//! A token bucket: tokens refill continuously at `requests_per_second` up to
//! `requests_per_second + burst`, and each HTTP call takes one.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limit settings of one connector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Steady request rate (0 = unlimited)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Requests allowed above the steady rate after an idle period
    #[serde(default)]
    pub burst: u32,
}

fn default_requests_per_second() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: 0,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            burst: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.requests_per_second > 0
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all calls of a connector
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    capacity: f64,
    bucket: Mutex<Bucket>,
    throttled: AtomicU64,
    waited_ms: AtomicU64,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.requests_per_second) + f64::from(config.burst);
        Self {
            config,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            throttled: AtomicU64::new(0),
            waited_ms: AtomicU64::new(0),
        }
    }

    /// Take one token, sleeping until one is available
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        if !self.config.is_enabled() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        loop {
            let wait = match self.take() {
                None => break,
                Some(wait) => wait,
            };
            tokio::time::sleep(wait).await;
        }

        let waited = start.elapsed();
        if !waited.is_zero() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            self.waited_ms
                .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
            debug!(waited_ms = waited.as_millis() as u64, "Rate limited request");
        }
        waited
    }

    /// Take one token if available without waiting
    pub fn try_acquire(&self) -> bool {
        !self.config.is_enabled() || self.take().is_none()
    }

    /// `None` when a token was taken, else the time until one refills
    fn take(&self) -> Option<Duration> {
        let rate = f64::from(self.config.requests_per_second);
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / rate))
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            throttled: self.throttled.load(Ordering::Relaxed),
            waited_ms: self.waited_ms.load(Ordering::Relaxed),
            requests_per_second: self.config.requests_per_second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Requests that had to wait for a token
    pub throttled: u64,
    pub waited_ms: u64,
    pub requests_per_second: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: RateLimitConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.requests_per_second, 5);
        assert_eq!(config.burst, 0);
        assert!(!RateLimitConfig::unlimited().is_enabled());
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = TokenBucket::new(RateLimitConfig::unlimited());
        for _ in 0..100 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        assert_eq!(limiter.stats().throttled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_once_bucket_is_empty() {
        let limiter = TokenBucket::new(RateLimitConfig::new(5));
        for _ in 0..5 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        assert!(!limiter.try_acquire());

        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(190), "waited {waited:?}");
        assert_eq!(limiter.stats().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let limiter = TokenBucket::new(RateLimitConfig::new(2).with_burst(1));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
