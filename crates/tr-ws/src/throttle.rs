//! Shared request throttle
//!
//! A token bucket behind a lock, shared across the tasks issuing detail
//! lookups so their combined rate stays under the server's limit.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tr_types::{TokenBucket, TokenBucketConfig};
use tracing::instrument;

// Rounding can leave a token a hair short with a zero wait
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Thread-safe token-bucket throttle
#[derive(Debug)]
pub struct RequestThrottle {
    config: TokenBucketConfig,
    bucket: Mutex<TokenBucket>,
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(TokenBucketConfig::default())
    }
}

impl RequestThrottle {
    /// Create a throttle with the given bucket configuration
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            bucket: Mutex::new(config.create_bucket_at(now())),
            config,
        }
    }

    /// Create a throttle that effectively never waits (for testing)
    pub fn permissive() -> Self {
        Self::new(TokenBucketConfig::new(10_000, 10_000.0))
    }

    /// Try to take a token without waiting
    ///
    /// Returns `Err(wait)` with the time until a token is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.bucket.lock().try_acquire_at(now())
    }

    /// Wait until a token is available, then take it
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait.max(MIN_WAIT)).await,
            }
        }
    }

    /// Get available tokens
    pub fn available(&self) -> u32 {
        self.bucket.lock().available_at(now())
    }

    /// Refill the bucket
    pub fn reset(&self) {
        self.bucket.lock().reset_at(now());
    }

    /// Get the bucket configuration
    pub fn config(&self) -> TokenBucketConfig {
        self.config
    }
}

// Tokio's clock, so paused test time drives the refill
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Throttle shared across tasks
pub type SharedThrottle = Arc<RequestThrottle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire() {
        let throttle = RequestThrottle::new(TokenBucketConfig::new(2, 1.0));
        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_err());

        throttle.reset();
        assert_eq!(throttle.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let throttle = RequestThrottle::new(TokenBucketConfig::new(1, 20.0));
        throttle.acquire().await;

        let start = Instant::now();
        throttle.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(52), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_calls_after_burst() {
        let throttle = RequestThrottle::new(TokenBucketConfig::new(2, 4.0));
        let start = Instant::now();

        let mut granted = Vec::new();
        for _ in 0..5 {
            throttle.acquire().await;
            granted.push(start.elapsed());
        }

        let ms = |n| Duration::from_millis(n);
        assert_eq!(granted, vec![ms(0), ms(0), ms(250), ms(500), ms(750)]);
    }
}
