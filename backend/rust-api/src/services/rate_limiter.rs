use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::metrics::RATE_LIMIT_DECISIONS_TOTAL;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Per-user token bucket admission gate.
///
/// Buckets live in a sharded map; `DashMap::entry` holds the shard lock for
/// the whole refill-and-take step, so acquisitions for one user are atomic
/// while other users proceed in parallel. A missing bucket is a full bucket.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    per_minute: f64,
    burst: f64,
    ttl: chrono::Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            per_minute: config.requests_per_minute as f64,
            burst: config.burst_capacity as f64,
            ttl: chrono::Duration::seconds(config.bucket_ttl_secs as i64),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: DateTime<Utc>) {
        // a clock step backwards refills nothing
        let elapsed = (now - bucket.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed * self.per_minute / 60.0).min(self.burst);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }
    }

    pub fn try_acquire(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let mut entry = self
            .buckets
            .entry(user_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.burst,
                last_refill: now,
            });
        let bucket = entry.value_mut();
        self.refill(bucket, now);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        drop(entry);

        let decision = if allowed { "allowed" } else { "denied" };
        RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&[decision])
            .inc();
        if !allowed {
            tracing::warn!("Rate limit exceeded for user: {}", user_id);
        }
        allowed
    }

    pub fn remaining_tokens(&self, user_id: &str, now: DateTime<Utc>) -> f64 {
        match self.buckets.get(user_id) {
            Some(bucket) => {
                let mut copy = *bucket;
                self.refill(&mut copy, now);
                copy.tokens
            }
            None => self.burst,
        }
    }

    /// Seconds until the next token is available, rounded up.
    pub fn retry_after_secs(&self, user_id: &str, now: DateTime<Utc>) -> u64 {
        let missing = (1.0 - self.remaining_tokens(user_id, now)).max(0.0);
        (missing * 60.0 / self.per_minute).ceil() as u64
    }

    /// Drops buckets idle for longer than the TTL; returns how many.
    ///
    /// Only buckets that would already be full are dropped, so removing one
    /// never grants tokens the user has not earned back.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            if bucket.last_refill >= cutoff {
                return true;
            }
            let mut projected = *bucket;
            self.refill(&mut projected, now);
            projected.tokens < self.burst
        });
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::info!("Cleaned up {} idle rate limit buckets", removed);
        }
        removed
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}
