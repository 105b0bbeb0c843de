/// Per-client rate limiting for the write endpoints
///
/// Token bucket per client IP holding at most one token, refilled once per
/// interval. A client may burst once after being idle for an interval, then
/// has to wait out the refill.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Rate limiter keyed by client address
pub struct ClientLimiter {
    buckets: RwLock<HashMap<IpAddr, TokenBucket>>,
    interval: Duration,
}

/// Token bucket for a single client
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Fraction of the single token currently available
    tokens: f64,

    /// Last refill time
    last_refill: Instant,

    /// Requests rejected so far
    violations: u32,
}

impl TokenBucket {
    fn new() -> Self {
        Self {
            tokens: 1.0,
            last_refill: Instant::now(),
            violations: 0,
        }
    }

    fn refill(&mut self, interval: Duration) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() / interval.as_secs_f64()).min(1.0);
        self.last_refill = now;
    }

    /// Time until a full token is available again
    fn retry_after(&self, interval: Duration) -> Duration {
        interval.mul_f64((1.0 - self.tokens).max(0.0))
    }

    fn try_consume(&mut self, interval: Duration) -> Result<(), RateLimitError> {
        self.refill(interval);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            self.violations += 1;
            Err(RateLimitError::RateLimitExceeded {
                retry_after: self.retry_after(interval),
            })
        }
    }
}

impl ClientLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take the client's token, or report how long it has to wait
    pub async fn check(&self, client: IpAddr) -> Result<(), RateLimitError> {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(client)
            .or_insert_with(TokenBucket::new)
            .try_consume(self.interval)
    }

    /// Forget clients whose bucket has fully refilled
    pub async fn purge_idle(&self) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        let interval = self.interval;
        buckets.retain(|_, bucket| bucket.last_refill.elapsed() < interval);
        before - buckets.len()
    }

    pub async fn stats(&self) -> RateLimitStats {
        let buckets = self.buckets.read().await;
        RateLimitStats {
            tracked_clients: buckets.len(),
            total_violations: buckets.values().map(|b| b.violations).sum(),
        }
    }
}

/// Overall rate limiting statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStats {
    pub tracked_clients: usize,
    pub total_violations: u32,
}

/// Rate limiting errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimitExceeded { retry_after: Duration },
}
