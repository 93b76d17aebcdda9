//! The public rate limiter.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::QuotaBackend;
use super::bucket::BucketStore;
use super::registry::{LimitConfig, LimitRegistry};
use super::rules::{PolicyFile, PolicyRule};
use super::sweeper::Sweeper;
use crate::error::Result;

/// Default interval between sweeps of expired buckets.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterOptions {
    /// How often expired buckets are reclaimed
    pub sweep_interval: Duration,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Fixed-window rate limiter keyed by `<policy>:<subject>` strings.
///
/// Owns its policy registry, its bucket store and the sweeper task. Create
/// one per service and share it behind an `Arc`; nothing here is global.
/// Calling [`RateLimiter::shutdown`] (or dropping the limiter) stops the
/// sweeper, after which every consume is denied.
#[derive(Debug)]
pub struct RateLimiter {
    registry: Arc<LimitRegistry>,
    store: Arc<BucketStore>,
    sweeper: Sweeper,
    shut_down: AtomicBool,
}

impl RateLimiter {
    /// Create a limiter and start its sweeper on the current tokio runtime.
    pub fn new(options: RateLimiterOptions) -> Result<Self> {
        let registry = Arc::new(LimitRegistry::new());
        let store = Arc::new(BucketStore::new(registry.clone()));
        let sweeper = Sweeper::start(store.clone(), options.sweep_interval)?;

        Ok(Self {
            registry,
            store,
            sweeper,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Insert or replace a named policy.
    ///
    /// The new window applies to expiry immediately: an existing bucket keeps
    /// its window start but is judged against the new length on its next
    /// access. The new capacity is granted from the next rollover, though a
    /// lowered capacity also caps what is left in the current window.
    pub fn configure_limit(&self, name: &str, max_tokens: u64, window: Duration) -> Result<()> {
        self.registry.configure(name, max_tokens, window)
    }

    /// Configure every rule in order, stopping at the first invalid one.
    pub fn apply_rules(&self, rules: &[PolicyRule]) -> Result<usize> {
        for rule in rules {
            self.configure_limit(&rule.name, rule.max_tokens, rule.window())?;
        }
        Ok(rules.len())
    }

    /// Configure every policy in a policy file.
    pub fn apply_policies(&self, file: &PolicyFile) -> Result<usize> {
        let applied = self.apply_rules(&file.policies)?;
        info!(count = applied, "Applied policy file");
        Ok(applied)
    }

    /// The current settings of a policy.
    pub fn limit(&self, name: &str) -> Option<LimitConfig> {
        self.registry.lookup(name)
    }

    /// Try to take `tokens` from the bucket for `key`.
    ///
    /// Completes without suspending; the async signature matches the rest of
    /// the request path. See [`RateLimiter::try_consume_now`].
    pub async fn try_consume(&self, key: &str, tokens: u64) -> bool {
        self.try_consume_now(key, tokens)
    }

    /// Synchronous form of [`RateLimiter::try_consume`].
    ///
    /// Denies when the key has no `:`, when its policy is not configured,
    /// when fewer than `tokens` remain in the window, or after shutdown.
    pub fn try_consume_now(&self, key: &str, tokens: u64) -> bool {
        if self.shut_down.load(Ordering::Acquire) {
            debug!(key = %key, "Denying consume on shut down rate limiter");
            return false;
        }
        self.store.try_consume(key, tokens)
    }

    /// Stop the sweeper. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sweeper.stop();
        info!(buckets = self.store.len(), "Rate limiter shut down");
    }

    /// Whether [`RateLimiter::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// Clear all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl QuotaBackend for RateLimiter {
    async fn try_consume(&self, key: &str, tokens: u64) -> bool {
        self.try_consume_now(key, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatekeeperError;
    use crate::ratelimit::KeyBuilder;
    use futures::future::join_all;
    use tokio_test::{assert_err, assert_ok};

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limiter_creation() {
        let limiter = limiter();
        assert_eq!(limiter.bucket_count(), 0);
        assert!(!limiter.is_shut_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_messages_roll_over_after_window() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("chat-msg", 3, Duration::from_secs(1)));

        for _ in 0..3 {
            assert!(limiter.try_consume("chat-msg:user:alice", 1).await);
        }
        assert!(!limiter.try_consume("chat-msg:user:alice", 1).await);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(limiter.try_consume("chat-msg:user:alice", 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_available_after_rollover() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("api", 4, Duration::from_secs(2)));

        for cycle in 0..3 {
            for i in 0..4 {
                assert!(
                    limiter.try_consume("api:ip:10.0.0.1", 1).await,
                    "cycle {} request {} should be allowed",
                    cycle,
                    i
                );
            }
            for _ in 0..10 {
                assert!(!limiter.try_consume("api:ip:10.0.0.1", 1).await);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    #[tokio::test]
    async fn test_multi_token_consume() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("api", 5, Duration::from_secs(1)));

        assert!(limiter.try_consume("api:user:bob", 5).await);
        assert!(!limiter.try_consume("api:user:bob", 1).await);
    }

    #[tokio::test]
    async fn test_unconfigured_policy_denied() {
        let limiter = limiter();
        assert!(!limiter.try_consume("unknown:user:carol", 1).await);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_key_without_colon_denied() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("no-colon-here", 10, Duration::from_secs(1)));

        assert!(!limiter.try_consume("no-colon-here", 1).await);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_limits_rejected() {
        let limiter = limiter();

        let err = assert_err!(limiter.configure_limit("api", 0, Duration::from_secs(1)));
        assert!(matches!(err, RatekeeperError::InvalidLimit { .. }));
        assert_err!(limiter.configure_limit("api", 5, Duration::ZERO));

        assert!(limiter.limit("api").is_none());
        assert!(!limiter.try_consume("api:global", 1).await);
    }

    #[tokio::test]
    async fn test_reconfigure_changes_ceiling() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("upload", 1, Duration::from_secs(60)));
        assert_ok!(limiter.configure_limit("upload", 3, Duration::from_secs(60)));

        for _ in 0..3 {
            assert!(limiter.try_consume("upload:user:dana", 1).await);
        }
        assert!(!limiter.try_consume("upload:user:dana", 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raised_limit_applies_at_next_window() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("api", 1, Duration::from_secs(1)));
        assert!(limiter.try_consume("api:user:erin", 1).await);

        assert_ok!(limiter.configure_limit("api", 2, Duration::from_secs(1)));
        assert!(!limiter.try_consume("api:user:erin", 1).await);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(limiter.try_consume("api:user:erin", 1).await);
        assert!(limiter.try_consume("api:user:erin", 1).await);
        assert!(!limiter.try_consume("api:user:erin", 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lengthened_window_applies_to_live_bucket() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("api", 1, Duration::from_secs(1)));
        assert!(limiter.try_consume("api:user:gina", 1).await);

        assert_ok!(limiter.configure_limit("api", 1, Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!limiter.try_consume("api:user:gina", 1).await);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(limiter.try_consume("api:user:gina", 1).await);
    }

    #[tokio::test]
    async fn test_clear_buckets() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("api", 1, Duration::from_secs(60)));

        assert!(limiter.try_consume("api:global", 1).await);
        assert!(!limiter.try_consume("api:global", 1).await);
        assert_eq!(limiter.bucket_count(), 1);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.try_consume("api:global", 1).await);
    }

    #[tokio::test]
    async fn test_sibling_keys_do_not_share_capacity() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("chat-msg", 2, Duration::from_secs(60)));

        let alice = KeyBuilder::per_user("chat-msg", "alice").unwrap();
        let bob = KeyBuilder::per_user("chat-msg", "bob").unwrap();

        assert!(limiter.try_consume(&alice, 2).await);
        assert!(!limiter.try_consume(&alice, 1).await);

        assert!(limiter.try_consume(&bob, 1).await);
        assert!(limiter.try_consume(&bob, 1).await);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_grants_exact_capacity() {
        let limiter = Arc::new(limiter());
        assert_ok!(limiter.configure_limit("burst", 100, Duration::from_secs(60)));

        let tasks = (0..100).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.try_consume("burst:global", 1).await })
        });
        let results = join_all(tasks).await;

        assert!(results.into_iter().all(|r| r.unwrap()));
        assert!(!limiter.try_consume("burst:global", 1).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_oversubscription_no_double_spend() {
        let limiter = Arc::new(limiter());
        assert_ok!(limiter.configure_limit("burst", 37, Duration::from_secs(60)));

        let tasks = (0..200).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.try_consume("burst:user:frank", 1).await })
        });
        let granted = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(granted, 37);
    }

    #[tokio::test]
    async fn test_apply_policies() {
        let limiter = limiter();
        let file = PolicyFile::from_yaml(
            r#"
policies:
  - name: chat-msg
    max_tokens: 3
    unit: second
  - name: isbn-lookup
    max_tokens: 100
    unit: day
"#,
        )
        .unwrap();

        assert_eq!(assert_ok!(limiter.apply_policies(&file)), 2);
        assert_eq!(limiter.limit("chat-msg").unwrap().max_tokens, 3);
        assert_eq!(
            limiter.limit("isbn-lookup").unwrap().window,
            Duration::from_secs(86400)
        );
    }

    #[tokio::test]
    async fn test_apply_policies_stops_at_invalid_rule() {
        let limiter = limiter();
        let file = PolicyFile::from_yaml(
            r#"
policies:
  - name: first
    max_tokens: 1
    unit: second
  - name: broken
    max_tokens: 0
    unit: second
  - name: never
    max_tokens: 1
    unit: second
"#,
        )
        .unwrap();

        assert_err!(limiter.apply_policies(&file));
        assert!(limiter.limit("first").is_some());
        assert!(limiter.limit("never").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_fails_closed() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("api", 5, Duration::from_secs(1)));
        assert!(limiter.try_consume("api:global", 1).await);

        limiter.shutdown();
        limiter.shutdown();

        assert!(limiter.is_shut_down());
        assert!(!limiter.try_consume("api:global", 1).await);
    }

    #[tokio::test]
    async fn test_usable_through_backend_trait() {
        let limiter = limiter();
        assert_ok!(limiter.configure_limit("login", 1, Duration::from_secs(60)));

        let backend: Arc<dyn QuotaBackend> = Arc::new(limiter);
        let key = KeyBuilder::per_ip("login", "192.168.1.1").unwrap();

        assert!(backend.try_consume(&key, 1).await);
        assert!(!backend.try_consume(&key, 1).await);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = RateLimiter::new(RateLimiterOptions::default());
        assert!(matches!(result, Err(RatekeeperError::Runtime(_))));
    }
}
