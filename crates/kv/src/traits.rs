//! Lock store trait definition.

use crate::error::KvResult;
use async_trait::async_trait;
use std::time::Duration;

/// Minimal key-value capability the mutex and upload tracking need.
///
/// Every write carries a TTL so abandoned entries expire on their own.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically set `key` to `value` unless it already holds a live value.
    ///
    /// Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool>;

    /// Delete `key` only if it currently holds `expected`.
    ///
    /// Returns `true` when the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool>;

    /// Unconditionally set `key`. Last writer wins.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Returns `true` when a live key was removed.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// Check connectivity.
    async fn health_check(&self) -> KvResult<()>;
}
