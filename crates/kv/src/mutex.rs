//! Distributed advisory mutex over a [`KvStore`].
//!
//! Each acquisition stores a random token under the lock key with a TTL.
//! Release deletes the key only if the token still matches, so a holder that
//! outlived its TTL cannot remove a successor's lock.

use crate::error::{KvError, KvResult};
use crate::traits::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::config::LockStoreConfig;
use uuid::Uuid;

/// Key prefix for quota-related locks.
pub const QUOTA_NAMESPACE: &str = "Quota::";

/// Acquisition tuning.
#[derive(Clone, Debug)]
pub struct MutexOptions {
    /// Lifetime of an acquired lock.
    pub ttl: Duration,
    /// Attempts after the first failed one.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for MutexOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            retry_count: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl From<&LockStoreConfig> for MutexOptions {
    fn from(config: &LockStoreConfig) -> Self {
        Self {
            ttl: config.lock_ttl(),
            retry_count: config.lock_retry_count,
            retry_delay: config.lock_retry_delay(),
        }
    }
}

/// An acquired lock. Hand it back to [`Locker::release`].
#[derive(Debug)]
pub struct Mutex {
    key: String,
    token: String,
}

impl Mutex {
    /// Full key including the namespace.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Outcome of [`Locker::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The lock expired or was taken over by another holder.
    NotOwner,
}

/// Acquires and releases namespaced locks.
#[derive(Clone)]
pub struct Locker {
    store: Arc<dyn KvStore>,
    namespace: String,
    options: MutexOptions,
}

impl Locker {
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>, options: MutexOptions) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            options,
        }
    }

    /// Locker for quota locks (`Quota::` namespace).
    pub fn for_quota(store: Arc<dyn KvStore>, options: MutexOptions) -> Self {
        Self::new(store, QUOTA_NAMESPACE, options)
    }

    /// Try to take `key`, retrying with a fixed delay.
    pub async fn acquire(&self, key: &str) -> KvResult<Mutex> {
        let full_key = format!("{}{}", self.namespace, key);
        let token = Uuid::new_v4().to_string();
        let attempts = self.options.retry_count.saturating_add(1);

        for attempt in 1..=attempts {
            if self
                .store
                .set_nx(&full_key, &token, self.options.ttl)
                .await?
            {
                tracing::debug!(key = %full_key, attempt, "lock acquired");
                return Ok(Mutex {
                    key: full_key,
                    token,
                });
            }
            if attempt < attempts {
                tracing::debug!(key = %full_key, attempt, "lock busy, retrying");
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        Err(KvError::LockTimeout {
            key: full_key,
            attempts,
        })
    }

    /// Release `mutex` if we still own it.
    pub async fn release(&self, mutex: Mutex) -> KvResult<Release> {
        if self
            .store
            .compare_and_delete(&mutex.key, &mutex.token)
            .await?
        {
            tracing::debug!(key = %mutex.key, "lock released");
            Ok(Release::Released)
        } else {
            tracing::warn!(key = %mutex.key, "lock was not owned at release");
            Ok(Release::NotOwner)
        }
    }
}
