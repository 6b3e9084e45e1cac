//! Token bucket rate limiter with a shared backoff gate.
//!
//! Every feed request takes a token first. When the feed answers with a
//! rate-limit error, [`RateLimiter::pause_for`] closes the gate and every
//! subsequent `acquire` waits until it reopens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A token bucket rate limiter.
///
/// Allows up to `capacity` requests per second, with tokens refilled
/// continuously at `requests_per_minute / 60_000` per millisecond.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum tokens in the bucket
    capacity: u32,
    /// Current available tokens (scaled by 1000 for precision)
    tokens: AtomicU64,
    /// Tokens added per millisecond
    refill_rate_per_ms: f64,
    /// Last refill timestamp
    last_refill: Mutex<Instant>,
    /// Requests are held back until this instant
    paused_until: Mutex<Option<Instant>>,
    /// Name for logging
    name: String,
}

impl RateLimiter {
    /// Create a new rate limiter allowing `requests_per_minute`.
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let requests_per_second = (requests_per_minute as f64 / 60.0).ceil() as u32;
        let capacity = requests_per_second.max(1);

        Self {
            capacity,
            tokens: AtomicU64::new((capacity as u64) * 1000),
            refill_rate_per_ms: requests_per_minute as f64 / 60_000.0,
            last_refill: Mutex::new(Instant::now()),
            paused_until: Mutex::new(None),
            name: name.into(),
        }
    }

    /// Create a rate limiter from requests per second.
    pub fn from_rps(name: impl Into<String>, requests_per_second: u32) -> Self {
        Self::new(name, requests_per_second * 60)
    }

    /// Acquire a token, waiting for the backoff gate and the bucket.
    pub async fn acquire(&self) {
        self.wait_for_gate().await;

        loop {
            if self.try_acquire() {
                return;
            }

            let wait_ms = (1.0 / self.refill_rate_per_ms).ceil() as u64;
            let wait_time = Duration::from_millis(wait_ms.clamp(10, 1000));

            debug!(
                limiter = %self.name,
                wait_ms = wait_time.as_millis() as u64,
                "Rate limited, waiting for token"
            );

            tokio::time::sleep(wait_time).await;
        }
    }

    /// Try to acquire a token without waiting.
    ///
    /// Ignores the backoff gate; returns `true` if a token was taken.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current < 1000 {
                return false;
            }

            if self
                .tokens
                .compare_exchange_weak(current, current - 1000, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Hold back all requests for `duration`.
    ///
    /// A shorter pause never shortens one already in effect.
    pub async fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut paused = self.paused_until.lock().await;
        if paused.map_or(true, |current| until > current) {
            warn!(
                limiter = %self.name,
                pause_ms = duration.as_millis() as u64,
                "Feed rate limit hit, pausing requests"
            );
            *paused = Some(until);
        }
    }

    /// Whether the backoff gate is currently closed.
    pub async fn is_paused(&self) -> bool {
        let paused = self.paused_until.lock().await;
        paused.map_or(false, |until| until > Instant::now())
    }

    async fn wait_for_gate(&self) {
        loop {
            let remaining = {
                let paused = self.paused_until.lock().await;
                paused.and_then(|until| until.checked_duration_since(Instant::now()))
            };

            match remaining {
                Some(wait) if !wait.is_zero() => tokio::time::sleep(wait).await,
                _ => return,
            }
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&self) {
        if let Ok(mut last_refill) = self.last_refill.try_lock() {
            let now = Instant::now();
            let elapsed_ms = now.duration_since(*last_refill).as_millis() as f64;

            let new_tokens = (elapsed_ms * self.refill_rate_per_ms * 1000.0) as u64;
            if new_tokens == 0 {
                return;
            }

            let max_tokens = (self.capacity as u64) * 1000;
            loop {
                let current = self.tokens.load(Ordering::Relaxed);
                let new_value = (current + new_tokens).min(max_tokens);

                if current == new_value
                    || self
                        .tokens
                        .compare_exchange_weak(current, new_value, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    break;
                }
            }

            *last_refill = now;
        }
    }

    /// Current available tokens.
    pub fn available_tokens(&self) -> f64 {
        self.refill();
        self.tokens.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Configured capacity (burst size).
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Shared rate limiter that can be cloned.
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Create a shared rate limiter.
pub fn shared_limiter(name: impl Into<String>, requests_per_minute: u32) -> SharedRateLimiter {
    Arc::new(RateLimiter::new(name, requests_per_minute))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new("test", 300);
        assert_eq!(limiter.capacity(), 5);
    }

    #[test]
    fn test_try_acquire() {
        let limiter = RateLimiter::new("test", 60);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = RateLimiter::new("test", 0);
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_refill() {
        let limiter = RateLimiter::new("test", 6000);

        while limiter.try_acquire() {}

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_pause_holds_acquire() {
        let limiter = RateLimiter::new("test", 6000);
        limiter.pause_for(Duration::from_millis(80)).await;
        assert!(limiter.is_paused().await);

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(!limiter.is_paused().await);
    }

    #[tokio::test]
    async fn test_shorter_pause_does_not_shorten_gate() {
        let limiter = RateLimiter::new("test", 6000);
        limiter.pause_for(Duration::from_millis(200)).await;
        limiter.pause_for(Duration::from_millis(1)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.is_paused().await);
    }

    #[test]
    fn test_from_rps() {
        let limiter = RateLimiter::from_rps("test", 10);
        assert_eq!(limiter.capacity(), 10);
        assert!(limiter.available_tokens() <= 10.0);
    }
}
