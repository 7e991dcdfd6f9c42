//! Manifest push and delete quota builders.

use super::{Builder, manifest_info};
use crate::classify::Operation;
use crate::context::{ManifestInfo, resolve_project};
use crate::error::ApiResult;
use crate::interceptor::{
    Action, Interceptor, QuotaHooks, QuotaInterceptor, QuotaOptions, ResponseView,
};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use std::sync::Arc;
use tollgate_core::{ResourceList, ResourceName, is_digest};
use tollgate_metadata::MetadataStore;
use tollgate_metadata::models::{BlobRow, NewArtifact};
use tollgate_metadata::repos::{ArtifactRepo, BlobRepo};

pub fn manifest_lock_key(repository: &str, reference: &str) -> String {
    format!("manifest-lock::{repository}:{reference}")
}

pub fn blob_lock_key(project_id: i64, digest: &str) -> String {
    format!("blob-lock::{project_id}:{digest}")
}

/// Charges a manifest push.
pub struct ManifestCreationBuilder;

#[async_trait]
impl Builder for ManifestCreationBuilder {
    fn name(&self) -> &'static str {
        "manifest_creation"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::PushManifest {
            repository,
            reference,
        } = op
        else {
            return Ok(None);
        };

        let info = manifest_info(state, req, repository, reference).await?;
        let manager = state.charging_quota(info.project_id).await?;

        let opts = QuotaOptions {
            action: Action::Add,
            manager,
            mutex_keys: vec![manifest_lock_key(&info.repository, &info.tag)],
            resources: None,
            status_code: StatusCode::CREATED,
            hooks: Arc::new(ManifestPushHooks {
                metadata: state.metadata.clone(),
                info,
            }),
        };
        Ok(Some(Box::new(QuotaInterceptor::new(
            opts,
            state.locker.clone(),
        ))))
    }
}

struct ManifestPushHooks {
    metadata: Arc<dyn MetadataStore>,
    info: Arc<ManifestInfo>,
}

impl ManifestPushHooks {
    /// Size of `previous` once the pushed tag stops pointing at it, or 0 when
    /// another tag of the repository keeps it.
    async fn released_manifest_size(&self, previous: &str) -> ApiResult<i64> {
        let holders = self
            .metadata
            .list_artifacts_by_digest(&self.info.repository, previous)
            .await?;
        if holders.len() > 1 {
            return Ok(0);
        }
        Ok(self
            .metadata
            .get_blob(previous)
            .await?
            .map_or(0, |blob| blob.size))
    }
}

#[async_trait]
impl QuotaHooks for ManifestPushHooks {
    /// One count per new artifact. The manifest body is stored once per
    /// repository; moving a tag off a digest no other tag of the repository
    /// uses releases that digest's manifest, so the storage delta may be
    /// negative.
    async fn resources(&self) -> ApiResult<Option<ResourceList>> {
        let info = &self.info;
        let digest = info.digest.to_string();

        let in_repository = !self
            .metadata
            .list_artifacts_by_digest(&info.repository, &digest)
            .await?
            .is_empty();
        let existing = if info.is_tagged() {
            self.metadata
                .get_artifact(&info.repository, &info.tag)
                .await?
        } else {
            None
        };
        let known = existing.is_some() || (!info.is_tagged() && in_repository);

        let mut storage = if in_repository { 0 } else { info.size };
        if let Some(previous) = existing.filter(|a| a.digest != digest) {
            storage -= self.released_manifest_size(&previous.digest).await?;
        }

        let mut resources = ResourceList::new();
        if !known {
            resources.insert(ResourceName::Count, 1);
        }
        if storage != 0 {
            resources.insert(ResourceName::Storage, storage);
        }
        Ok(Some(resources))
    }

    async fn on_fulfilled(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        let info = &self.info;
        let digest = info.digest.to_string();

        self.metadata
            .upsert_artifact(&NewArtifact {
                project_id: info.project_id,
                repository: info.repository.clone(),
                tag: info.tag.clone(),
                digest: digest.clone(),
                kind: info.media_type.clone(),
            })
            .await?;

        let blob = self
            .metadata
            .ensure_blob(&digest, &info.media_type, info.size)
            .await?;
        self.metadata
            .link_blob_to_project(info.project_id, blob.id)
            .await?;

        let mut blobs = Vec::with_capacity(info.references.len() + 1);
        blobs.push(digest.clone());
        for reference in &info.references {
            let reference_digest = reference.digest.to_string();
            self.metadata
                .ensure_blob(&reference_digest, &reference.media_type, reference.size)
                .await?;
            blobs.push(reference_digest);
        }
        self.metadata.add_artifact_blobs(&digest, &blobs).await?;

        tracing::info!(
            repository = %info.repository,
            tag = %info.tag,
            digest = %digest,
            "manifest recorded"
        );
        Ok(())
    }
}

/// Credits a manifest delete.
pub struct ManifestDeletionBuilder;

#[async_trait]
impl Builder for ManifestDeletionBuilder {
    fn name(&self) -> &'static str {
        "manifest_deletion"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        _req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::DeleteManifest {
            repository,
            reference,
        } = op
        else {
            return Ok(None);
        };

        let project = resolve_project(state, repository).await?;
        let digest = if is_digest(reference) {
            reference.clone()
        } else {
            match state.metadata.get_artifact(repository, reference).await? {
                Some(artifact) => artifact.digest,
                None => return Ok(None),
            }
        };

        let exclusive = state
            .metadata
            .exclusive_blobs(project.project_id, repository, &digest)
            .await?;

        let mut mutex_keys = vec![manifest_lock_key(repository, &digest)];
        mutex_keys.extend(
            exclusive
                .iter()
                .map(|blob| blob_lock_key(project.project_id, &blob.digest)),
        );

        let manager = state.charging_quota(project.project_id).await?;
        let opts = QuotaOptions {
            action: Action::Subtract,
            manager,
            mutex_keys,
            resources: None,
            status_code: StatusCode::ACCEPTED,
            hooks: Arc::new(ManifestDeleteHooks {
                metadata: state.metadata.clone(),
                project_id: project.project_id,
                repository: repository.clone(),
                digest,
                exclusive,
            }),
        };
        Ok(Some(Box::new(QuotaInterceptor::new(
            opts,
            state.locker.clone(),
        ))))
    }
}

struct ManifestDeleteHooks {
    metadata: Arc<dyn MetadataStore>,
    project_id: i64,
    repository: String,
    digest: String,
    exclusive: Vec<BlobRow>,
}

#[async_trait]
impl QuotaHooks for ManifestDeleteHooks {
    /// Credits the repository's copy of the manifest plus the blobs no other
    /// artifact of the project still references.
    async fn resources(&self) -> ApiResult<Option<ResourceList>> {
        let artifacts = self
            .metadata
            .list_artifacts_by_digest(&self.repository, &self.digest)
            .await?;
        if artifacts.is_empty() {
            return Ok(None);
        }

        let manifest_size = self
            .metadata
            .get_blob(&self.digest)
            .await?
            .map_or(0, |blob| blob.size);
        let layers: i64 = self
            .exclusive
            .iter()
            .filter(|blob| blob.digest != self.digest)
            .map(|blob| blob.size)
            .sum();

        let mut resources =
            ResourceList::new().with(ResourceName::Count, artifacts.len() as i64);
        if manifest_size + layers > 0 {
            resources.insert(ResourceName::Storage, manifest_size + layers);
        }
        Ok(Some(resources))
    }

    async fn on_fulfilled(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        let removed = self
            .metadata
            .delete_artifacts_by_digest(&self.repository, &self.digest)
            .await?;

        let blob_ids: Vec<i64> = self.exclusive.iter().map(|blob| blob.id).collect();
        let unlinked = self
            .metadata
            .unlink_blobs_from_project(self.project_id, &blob_ids)
            .await?;
        self.metadata
            .delete_artifact_blobs_if_unused(&self.digest)
            .await?;

        tracing::info!(
            repository = %self.repository,
            digest = %self.digest,
            artifacts = removed,
            blobs = unlinked,
            "manifest removed"
        );
        Ok(())
    }
}
