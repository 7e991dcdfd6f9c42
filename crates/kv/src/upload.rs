//! Per-upload byte counts recorded between blob PATCH and PUT requests.

use crate::error::{KvError, KvResult};
use crate::traits::KvStore;
use std::sync::Arc;
use std::time::Duration;

/// Key holding the progressed size of an upload.
pub fn upload_size_key(uuid: &str) -> String {
    format!("upload:{uuid}:size")
}

/// Records upload sizes with a TTL so abandoned uploads are swept.
#[derive(Clone)]
pub struct UploadSizes {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl UploadSizes {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn record(&self, uuid: &str, size: i64) -> KvResult<()> {
        self.store
            .set(&upload_size_key(uuid), &size.to_string(), self.ttl)
            .await
    }

    pub async fn get(&self, uuid: &str) -> KvResult<Option<i64>> {
        let key = upload_size_key(uuid);
        match self.store.get(&key).await? {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| KvError::InvalidValue { key, value }),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, uuid: &str) -> KvResult<()> {
        self.store.delete(&upload_size_key(uuid)).await?;
        Ok(())
    }
}
