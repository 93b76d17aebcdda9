//! Quota backend trait used by callers of the limiter.

use async_trait::async_trait;

/// Trait for anything that can grant or refuse tokens for a key.
///
/// Request middleware and message handlers hold an `Arc<dyn QuotaBackend>`
/// so each service (and each test) can inject its own limiter instance.
#[async_trait]
pub trait QuotaBackend: Send + Sync {
    /// Try to take `tokens` from the bucket for `key`.
    ///
    /// Returns `true` if the operation may proceed.
    async fn try_consume(&self, key: &str, tokens: u64) -> bool;
}
