//! Per-key fixed-window buckets.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::keys::parse_policy;
use super::registry::{LimitConfig, LimitRegistry};

/// Token accounting for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    remaining: u64,
    window_start: Instant,
}

impl Bucket {
    /// A full bucket whose window opens at `now`.
    pub fn fresh(config: &LimitConfig, now: Instant) -> Self {
        Self {
            remaining: config.max_tokens,
            window_start: now,
        }
    }

    /// Tokens left in the current window.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// When the current window opened.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Whether `window` has fully elapsed since the window opened.
    pub fn is_expired(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    /// Deduct `tokens` if enough remain. A failed attempt changes nothing.
    fn try_take(&mut self, tokens: u64) -> bool {
        if self.remaining >= tokens {
            self.remaining -= tokens;
            true
        } else {
            false
        }
    }
}

/// Holds one bucket per key and runs the consume algorithm.
///
/// Buckets live in a sharded `DashMap`; every read-check-write on a key runs
/// while that key's shard guard is held, and the sweeper removes entries
/// under the same guard. Keys in different shards never wait on each other.
#[derive(Debug)]
pub struct BucketStore {
    registry: Arc<LimitRegistry>,
    buckets: DashMap<String, Bucket>,
}

impl BucketStore {
    /// Create an empty store that resolves policies from `registry`.
    pub fn new(registry: Arc<LimitRegistry>) -> Self {
        Self {
            registry,
            buckets: DashMap::new(),
        }
    }

    /// Try to take `tokens` from the bucket for `key`.
    pub fn try_consume(&self, key: &str, tokens: u64) -> bool {
        self.try_consume_at(key, tokens, Instant::now())
    }

    /// Try to take `tokens` from the bucket for `key` as of `now`.
    ///
    /// Returns `false` without touching any state when the key has no `:` or
    /// names a policy that was never configured.
    pub fn try_consume_at(&self, key: &str, tokens: u64, now: Instant) -> bool {
        let Some(policy) = parse_policy(key) else {
            debug!(key = %key, "Denying malformed rate limit key");
            return false;
        };

        let Some(config) = self.registry.lookup(policy) else {
            warn!(key = %key, policy = %policy, "Denying key for unconfigured policy");
            return false;
        };

        let mut created = false;
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                created = true;
                Bucket::fresh(&config, now)
            });

        if created {
            debug!(
                key = %key,
                max_tokens = config.max_tokens,
                window = ?config.window,
                "Created rate limit bucket"
            );
        } else if bucket.is_expired(config.window, now) {
            *bucket = Bucket::fresh(&config, now);
            debug!(key = %key, max_tokens = config.max_tokens, "Rolled over rate limit window");
        } else if bucket.remaining > config.max_tokens {
            // Policy was lowered mid-window.
            bucket.remaining = config.max_tokens;
        }

        let allowed = bucket.try_take(tokens);

        trace!(
            key = %key,
            tokens = tokens,
            remaining = bucket.remaining,
            allowed = allowed,
            "Checked rate limit"
        );

        if !allowed {
            debug!(key = %key, tokens = tokens, remaining = bucket.remaining, "Rate limit exceeded");
        }

        allowed
    }

    /// Remove every bucket whose window has elapsed as of `now`.
    ///
    /// Each bucket is judged against its own policy's current window.
    /// Returns the number of buckets removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut removed = 0;

        self.buckets.retain(|key, bucket| {
            let expired = match parse_policy(key).and_then(|p| self.registry.lookup(p)) {
                Some(config) => bucket.is_expired(config.window, now),
                None => true,
            };
            if expired {
                removed += 1;
            }
            !expired
        });

        removed
    }

    /// Snapshot of the bucket for `key`, if one exists.
    pub fn get(&self, key: &str) -> Option<Bucket> {
        self.buckets.get(key).map(|b| *b)
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no buckets exist.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}
