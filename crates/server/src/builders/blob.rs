//! Blob upload, completion and mount builders.

use super::Builder;
use super::manifest::blob_lock_key;
use crate::classify::Operation;
use crate::context::{BlobInfo, attach, header_str, resolve_project};
use crate::error::{ApiError, ApiResult};
use crate::interceptor::{
    Action, Interceptor, QuotaHooks, QuotaInterceptor, QuotaOptions, ResponseView,
};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use std::sync::Arc;
use tollgate_core::{Digest, ResourceList, ResourceName};
use tollgate_kv::UploadSizes;
use tollgate_metadata::MetadataStore;
use tollgate_metadata::repos::BlobRepo;

const UPLOAD_UUID_HEADER: &str = "docker-upload-uuid";
const DEFAULT_BLOB_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes received so far according to a `Range: start-end` response header.
///
/// The end is inclusive. A `bytes=` prefix is accepted. Returns `None` for
/// anything else, and for an end of 0.
pub fn progressed_size(range: &str) -> Option<i64> {
    let range = range.trim();
    let range = range.strip_prefix("bytes=").unwrap_or(range);
    let (start, end) = range.split_once('-')?;
    start.trim().parse::<i64>().ok()?;
    let end = end.trim().parse::<i64>().ok()?;
    (end > 0).then_some(end + 1)
}

/// Records the upload size reported by the registry after each chunk.
pub struct BlobPatchBuilder;

#[async_trait]
impl Builder for BlobPatchBuilder {
    fn name(&self) -> &'static str {
        "blob_patch"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        _req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::PatchBlob { uuid, .. } = op else {
            return Ok(None);
        };
        Ok(Some(Box::new(UploadProgress {
            uploads: state.uploads.clone(),
            uuid: uuid.clone(),
        })))
    }
}

/// Stores `upload:<uuid>:size` when a PATCH is accepted.
struct UploadProgress {
    uploads: UploadSizes,
    uuid: String,
}

#[async_trait]
impl Interceptor for UploadProgress {
    async fn handle_request(&mut self, _req: &mut Request) -> ApiResult<()> {
        Ok(())
    }

    async fn handle_response(&mut self, response: ResponseView<'_>) {
        if response.status != StatusCode::ACCEPTED {
            return;
        }
        let uuid = response
            .header(UPLOAD_UUID_HEADER)
            .unwrap_or(self.uuid.as_str())
            .to_string();
        let Some(range) = response.header(RANGE.as_str()) else {
            tracing::warn!(uuid = %uuid, "accepted blob chunk without a Range header");
            return;
        };
        let Some(size) = progressed_size(range) else {
            tracing::warn!(uuid = %uuid, range = %range, "unrecognised Range header, size not recorded");
            return;
        };
        if let Err(e) = self.uploads.record(&uuid, size).await {
            crate::metrics::record_hook_failure("upload_size");
            tracing::error!(uuid = %uuid, error = %e, "failed to record upload size");
        }
    }
}

/// Charges storage when an upload completes.
pub struct BlobCompleteBuilder;

#[async_trait]
impl Builder for BlobCompleteBuilder {
    fn name(&self) -> &'static str {
        "blob_complete"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::PutBlob {
            repository,
            uuid,
            digest,
        } = op
        else {
            return Ok(None);
        };

        let digest = Digest::parse(digest).map_err(|e| ApiError::DigestInvalid(e.to_string()))?;
        let project = resolve_project(state, repository).await?;

        let recorded = state.uploads.get(uuid).await?.unwrap_or(0);
        let trailing = header_str(req.headers(), CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let content_type = header_str(req.headers(), CONTENT_TYPE.as_str())
            .unwrap_or(DEFAULT_BLOB_CONTENT_TYPE)
            .to_string();

        let info = attach(
            req,
            BlobInfo {
                project_id: project.project_id,
                repository: repository.clone(),
                digest,
                size: recorded + trailing,
                content_type,
                upload_uuid: Some(uuid.clone()),
            },
        );
        blob_interceptor(state, info).await.map(Some)
    }
}

/// Charges storage when a blob is mounted from another repository.
pub struct BlobMountBuilder;

#[async_trait]
impl Builder for BlobMountBuilder {
    fn name(&self) -> &'static str {
        "blob_mount"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::MountBlob {
            repository,
            digest,
            from,
        } = op
        else {
            return Ok(None);
        };

        let digest = Digest::parse(digest).map_err(|e| ApiError::DigestInvalid(e.to_string()))?;
        let project = resolve_project(state, repository).await?;
        let Some(blob) = state.metadata.get_blob(&digest.to_string()).await? else {
            tracing::debug!(digest = %digest, from = %from, "mount of unrecorded blob, not charged");
            return Ok(None);
        };

        let info = attach(
            req,
            BlobInfo {
                project_id: project.project_id,
                repository: repository.clone(),
                digest,
                size: blob.size,
                content_type: blob.content_type,
                upload_uuid: None,
            },
        );
        blob_interceptor(state, info).await.map(Some)
    }
}

async fn blob_interceptor(state: &AppState, info: Arc<BlobInfo>) -> ApiResult<Box<dyn Interceptor>> {
    let manager = state.charging_quota(info.project_id).await?;
    let opts = QuotaOptions {
        action: Action::Add,
        manager,
        mutex_keys: vec![blob_lock_key(info.project_id, &info.digest.to_string())],
        resources: None,
        status_code: StatusCode::CREATED,
        hooks: Arc::new(BlobHooks {
            metadata: state.metadata.clone(),
            uploads: state.uploads.clone(),
            info,
        }),
    };
    Ok(Box::new(QuotaInterceptor::new(opts, state.locker.clone())))
}

struct BlobHooks {
    metadata: Arc<dyn MetadataStore>,
    uploads: UploadSizes,
    info: Arc<BlobInfo>,
}

#[async_trait]
impl QuotaHooks for BlobHooks {
    async fn resources(&self) -> ApiResult<Option<ResourceList>> {
        let present = self
            .metadata
            .blob_exists_in_project(self.info.project_id, &self.info.digest.to_string())
            .await?;
        if present {
            return Ok(None);
        }
        Ok(Some(
            ResourceList::new().with(ResourceName::Storage, self.info.size),
        ))
    }

    async fn on_fulfilled(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        let info = &self.info;
        let blob = self
            .metadata
            .ensure_blob(&info.digest.to_string(), &info.content_type, info.size)
            .await?;
        self.metadata
            .link_blob_to_project(info.project_id, blob.id)
            .await?;
        if let Some(uuid) = &info.upload_uuid {
            self.uploads.remove(uuid).await?;
        }
        tracing::debug!(
            repository = %info.repository,
            digest = %info.digest,
            size = info.size,
            "blob linked to project"
        );
        Ok(())
    }
}
