//! Redis lock store backend.

use crate::error::KvResult;
use crate::traits::KvStore;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use std::time::Duration;

/// Deletes the key only when it still holds the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed store using an auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_delete: ::redis::Script,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn new(url: &str) -> KvResult<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis lock store");
        Ok(Self {
            conn,
            compare_and_delete: ::redis::Script::new(COMPARE_AND_DELETE),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = ::redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
