//! Blob repository trait.

use crate::error::MetadataResult;
use crate::models::BlobRow;
use async_trait::async_trait;

/// Repository for blobs and their project links.
#[async_trait]
pub trait BlobRepo: Send + Sync {
    async fn get_blob(&self, digest: &str) -> MetadataResult<Option<BlobRow>>;

    /// Insert the blob if missing. A stored size of 0 is replaced by a known size.
    async fn ensure_blob(&self, digest: &str, content_type: &str, size: i64)
    -> MetadataResult<BlobRow>;

    async fn blob_exists_in_project(&self, project_id: i64, digest: &str) -> MetadataResult<bool>;

    /// Link a blob to a project. Linking twice is a no-op.
    async fn link_blob_to_project(&self, project_id: i64, blob_id: i64) -> MetadataResult<()>;

    /// Unlink blobs from a project. Returns the number of links removed.
    async fn unlink_blobs_from_project(
        &self,
        project_id: i64,
        blob_ids: &[i64],
    ) -> MetadataResult<u64>;
}
