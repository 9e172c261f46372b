//! Token bucket rate limiting for join admission and outbound gossip
//!
//! Both limiters are `Send + Sync` and can be shared with admin tooling or
//! metrics readers while the node actor consults them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use crate::config::RateLimitConfig;

/// Classic token bucket refilled continuously at `rate` tokens per second
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32, now: Instant) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            tokens: burst,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Take one token if available
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }
}

/// Per-address join limiter with a bounded address table
pub struct JoinRateLimiter {
    rate: f64,
    burst: u32,
    max_entries: usize,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl JoinRateLimiter {
    pub fn new(rate: f64, burst: u32, max_entries: usize) -> Self {
        Self {
            rate,
            burst,
            max_entries: max_entries.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.join_rate, config.join_burst, config.join_max_entries)
    }

    pub fn allow(&self, address: &str) -> bool {
        self.allow_at(address, Instant::now())
    }

    pub fn allow_at(&self, address: &str, now: Instant) -> bool {
        if self.rate <= 0.0 {
            return true;
        }
        let mut buckets = self.buckets.lock();
        if !buckets.contains_key(address) && buckets.len() >= self.max_entries {
            // Evict the bucket touched longest ago
            if let Some(oldest) = buckets
                .iter()
                .min_by_key(|(_, bucket)| bucket.last_refill)
                .map(|(key, _)| key.clone())
            {
                buckets.remove(&oldest);
            }
        }
        buckets
            .entry(address.to_string())
            .or_insert_with(|| TokenBucket::new(self.rate, self.burst, now))
            .try_acquire(now)
    }

    pub fn tracked_addresses(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// One global bucket bounding total gossip sends. A rate of zero or less
/// disables the limit.
pub struct GossipRateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl GossipRateLimiter {
    pub fn new(rate: f64, burst: u32) -> Self {
        let bucket = (rate > 0.0).then(|| Mutex::new(TokenBucket::new(rate, burst, Instant::now())));
        Self { bucket }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.gossip_rate, config.gossip_burst)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.lock().try_acquire(now),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_bucket_burst_then_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 3, start);
        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(!bucket.try_acquire(start));

        // 2 tokens/s: half a second buys one more
        assert!(bucket.try_acquire(start + Duration::from_millis(500)));
        assert!(!bucket.try_acquire(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_join_limiter_per_address() {
        let limiter = JoinRateLimiter::new(1.0, 1, 100);
        let now = Instant::now();
        assert!(limiter.allow_at("10.0.0.1:7000", now));
        assert!(!limiter.allow_at("10.0.0.1:7000", now));
        assert!(limiter.allow_at("10.0.0.2:7000", now));
    }

    #[test]
    fn test_join_limiter_evicts_oldest() {
        let limiter = JoinRateLimiter::new(1.0, 1, 2);
        let t0 = Instant::now();
        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("b", t0 + Duration::from_millis(1)));
        assert!(limiter.allow_at("c", t0 + Duration::from_millis(2)));
        assert_eq!(limiter.tracked_addresses(), 2);

        // "a" was evicted so it starts with a fresh burst
        assert!(limiter.allow_at("a", t0 + Duration::from_millis(3)));
    }

    #[test]
    fn test_non_positive_rate_is_unlimited() {
        let gossip = GossipRateLimiter::new(0.0, 1);
        assert!(gossip.is_unlimited());
        for _ in 0..1000 {
            assert!(gossip.allow());
        }
        let join = JoinRateLimiter::new(-1.0, 1, 1);
        assert!(join.allow("x") && join.allow("x"));
    }

    #[test]
    fn test_gossip_limiter_shared_across_threads() {
        let limiter = Arc::new(GossipRateLimiter::new(0.001, 10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..10).filter(|_| limiter.allow()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
    }
}
