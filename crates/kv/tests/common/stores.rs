//! Lock store fixtures.

use std::sync::Arc;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tollgate_kv::{KvError, KvResult, KvStore, MemoryStore, RedisStore};

/// A Redis store backed by a testcontainer.
pub struct RedisTestStore {
    pub store: Arc<dyn KvStore>,
    _container: ContainerAsync<Redis>,
}

impl RedisTestStore {
    pub async fn new() -> KvResult<Self> {
        let container = Redis::default()
            .start()
            .await
            .map_err(|e| KvError::Config(format!("Failed to start Redis container: {e}")))?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get port");

        let store = RedisStore::new(&format!("redis://{host}:{port}")).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }
}

/// Run a test against the memory backend and, when available, Redis.
///
/// Redis is skipped when `SKIP_REDIS_TESTS` is set or Docker is unavailable.
#[allow(dead_code)]
pub async fn run_kv_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn KvStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    test_fn.clone()(Arc::new(MemoryStore::new())).await;

    if std::env::var("SKIP_REDIS_TESTS").is_err() {
        match RedisTestStore::new().await {
            Ok(redis) => test_fn(redis.store.clone()).await,
            Err(err) => eprintln!("Skipping Redis lock store tests: {err}"),
        }
    }
}
