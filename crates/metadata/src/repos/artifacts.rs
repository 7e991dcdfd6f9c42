//! Artifact repository trait.

use crate::error::MetadataResult;
use crate::models::{ArtifactRow, BlobRow, NewArtifact};
use async_trait::async_trait;

/// Repository for artifacts and their blob references.
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    async fn get_artifact(
        &self,
        repository: &str,
        tag: &str,
    ) -> MetadataResult<Option<ArtifactRow>>;

    /// Artifacts in `repository` pointing at `digest`.
    async fn list_artifacts_by_digest(
        &self,
        repository: &str,
        digest: &str,
    ) -> MetadataResult<Vec<ArtifactRow>>;

    /// Insert the artifact, or re-point an existing `(repository, tag)` at the new digest.
    async fn upsert_artifact(&self, artifact: &NewArtifact) -> MetadataResult<ArtifactRow>;

    /// Remove every artifact in `repository` pointing at `digest`. Returns the number removed.
    async fn delete_artifacts_by_digest(&self, repository: &str, digest: &str)
    -> MetadataResult<u64>;

    /// Repositories that have at least one artifact.
    async fn list_repositories(&self) -> MetadataResult<Vec<String>>;

    /// Record that `artifact_digest` references each of `blob_digests`.
    async fn add_artifact_blobs(
        &self,
        artifact_digest: &str,
        blob_digests: &[String],
    ) -> MetadataResult<()>;

    async fn list_artifact_blobs(&self, artifact_digest: &str) -> MetadataResult<Vec<String>>;

    /// Project blobs referenced by `artifact_digest` and by no artifact of the
    /// project outside `repository`'s artifacts with that digest.
    async fn exclusive_blobs(
        &self,
        project_id: i64,
        repository: &str,
        artifact_digest: &str,
    ) -> MetadataResult<Vec<BlobRow>>;

    /// Drop blob references of `artifact_digest` once no artifact uses that digest.
    async fn delete_artifact_blobs_if_unused(&self, artifact_digest: &str) -> MetadataResult<u64>;
}
