//! Lock store abstraction and distributed mutex for tollgate.
//!
//! This crate provides:
//! - A small key-value capability (`SET NX PX`, compare-and-delete, TTL writes)
//! - Backends: Redis and in-process memory
//! - A token-checked advisory mutex with retry and TTL
//! - Upload size tracking between blob PATCH and PUT requests

pub mod backends;
pub mod error;
pub mod mutex;
pub mod traits;
pub mod upload;

pub use backends::memory::{MemoryStore, spawn_purge_task};
pub use backends::redis::RedisStore;
pub use error::{KvError, KvResult};
pub use mutex::{Locker, Mutex, MutexOptions, QUOTA_NAMESPACE, Release};
pub use traits::KvStore;
pub use upload::{UploadSizes, upload_size_key};

use std::sync::Arc;
use tollgate_core::config::{LockBackendConfig, LockStoreConfig};

/// Create a lock store from configuration.
pub async fn from_config(config: &LockStoreConfig) -> KvResult<Arc<dyn KvStore>> {
    config.validate().map_err(KvError::Config)?;

    match &config.backend {
        LockBackendConfig::Redis { url } => {
            let store = RedisStore::new(url).await?;
            Ok(Arc::new(store))
        }
        LockBackendConfig::Memory => {
            tracing::warn!("Using in-memory lock store; locks are not shared between instances");
            let store = Arc::new(MemoryStore::new());
            spawn_purge_task(&store, config.purge_interval());
            tracing::info!(
                interval_secs = config.purge_interval_secs,
                "Lock store purge task spawned"
            );
            Ok(store)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_memory() {
        let store = from_config(&LockStoreConfig::default()).await.unwrap();
        store.health_check().await.unwrap();
        assert!(store.set_nx("a", "1", std::time::Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let config = LockStoreConfig {
            lock_ttl_secs: 0,
            ..LockStoreConfig::default()
        };
        assert!(matches!(
            from_config(&config).await,
            Err(KvError::Config(_))
        ));
    }
}
