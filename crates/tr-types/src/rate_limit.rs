//! Client-side request pacing
//!
//! Token bucket used to keep bursts of detail lookups below the server's
//! rate limiting threshold.

use std::time::{Duration, Instant};

/// Token bucket rate limiter
///
/// Tokens are consumed when making requests and refill at a constant rate.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens (bucket capacity)
    capacity: u32,
    /// Current number of available tokens
    tokens: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time tokens were refilled
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a new token bucket, initially full
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::starting_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`
    pub fn starting_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    /// Try to take one token
    ///
    /// Returns `Err(wait)` with the time until a token is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) against a caller-supplied clock
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.refill_rate <= 0.0 {
            Err(Duration::from_secs(1))
        } else {
            let needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(needed / self.refill_rate))
        }
    }

    /// Get current available tokens
    pub fn available(&mut self) -> u32 {
        self.available_at(Instant::now())
    }

    /// Available tokens at `now`
    pub fn available_at(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }

    /// Get the capacity of this bucket
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reset the bucket to full capacity
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// Refill to capacity as of `now`
    pub fn reset_at(&mut self, now: Instant) {
        self.tokens = self.capacity as f64;
        self.last_refill = now;
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let added = elapsed.as_secs_f64() * self.refill_rate;
        self.tokens = (self.tokens + added).min(self.capacity as f64);
        self.last_refill = now;
    }
}

/// Configuration for a single token bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    /// Maximum burst
    pub capacity: u32,
    /// Tokens per second
    pub refill_rate: f64,
}

impl TokenBucketConfig {
    /// Create a new token bucket configuration
    pub const fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Create a token bucket from this configuration
    pub fn create_bucket(&self) -> TokenBucket {
        TokenBucket::new(self.capacity, self.refill_rate)
    }

    /// Create a token bucket whose clock starts at `now`
    pub fn create_bucket_at(&self, now: Instant) -> TokenBucket {
        TokenBucket::starting_at(self.capacity, self.refill_rate, now)
    }
}

impl Default for TokenBucketConfig {
    /// Burst of 10 lookups, then 5 per second
    fn default() -> Self {
        Self::new(10, 5.0)
    }
}
