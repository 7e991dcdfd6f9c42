//! Builders turn a classified request into interceptors.
//!
//! Builders are grouped per stage. Within a group the first builder that
//! recognises the request wins; a stage runs its groups in order and
//! collects at most one interceptor from each.

pub mod blob;
pub mod chart;
pub mod immutable;
pub mod manifest;

use crate::classify::Operation;
use crate::context::{ManifestInfo, attach, buffer_body, extension, header_str, resolve_project};
use crate::error::{ApiError, ApiResult};
use crate::interceptor::Interceptor;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use std::sync::Arc;
use tollgate_core::manifest::{ManifestDescriptor, base_media_type};
use tollgate_core::{Digest, is_digest};

/// Produces an interceptor for requests it recognises.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// `Ok(None)` when this builder does not apply to `op`.
    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>>;
}

/// Builders that may veto a manifest push or delete.
pub static IMMUTABLE_BUILDERS: &[&dyn Builder] = &[
    &immutable::ImmutablePushBuilder,
    &immutable::ImmutableDeleteBuilder,
];

/// Quota builders for blob uploads and mounts.
pub static BLOB_BUILDERS: &[&dyn Builder] = &[
    &blob::BlobPatchBuilder,
    &blob::BlobCompleteBuilder,
    &blob::BlobMountBuilder,
];

/// Quota builders for manifests and charts.
pub static REGISTRY_BUILDERS: &[&dyn Builder] = &[
    &manifest::ManifestCreationBuilder,
    &manifest::ManifestDeletionBuilder,
    &chart::ChartUploadBuilder,
    &chart::ChartDeleteBuilder,
];

/// First interceptor of `group` that applies to `op`.
pub async fn build_first(
    group: &[&dyn Builder],
    state: &AppState,
    op: &Operation,
    req: &mut Request,
) -> ApiResult<Option<Box<dyn Interceptor>>> {
    for builder in group {
        if let Some(interceptor) = builder.build(state, op, req).await? {
            tracing::debug!(
                builder = builder.name(),
                operation = op.name(),
                "interceptor built"
            );
            return Ok(Some(interceptor));
        }
    }
    Ok(None)
}

/// Parse the pushed manifest once and attach it to the request.
///
/// Media types the inspector does not understand are still digested so the
/// push can be counted; they just carry no blob references.
pub(crate) async fn manifest_info(
    state: &AppState,
    req: &mut Request,
    repository: &str,
    reference: &str,
) -> ApiResult<Arc<ManifestInfo>> {
    if let Some(info) = extension::<ManifestInfo>(req) {
        return Ok(info);
    }

    let project = resolve_project(state, repository).await?;
    let content_type = header_str(req.headers(), CONTENT_TYPE.as_str())
        .unwrap_or_default()
        .to_string();
    let body = buffer_body(req, state.config.server.max_manifest_size).await?;

    let descriptor = match state.manifest_inspector.inspect(&content_type, &body) {
        Ok(descriptor) => descriptor,
        Err(tollgate_core::Error::UnsupportedMediaType(media_type)) => {
            tracing::debug!(media_type = %media_type, "manifest not inspected, digesting body only");
            ManifestDescriptor {
                digest: Digest::sha256_of(&body),
                media_type: base_media_type(&content_type).to_string(),
                size: body.len() as i64,
                references: Vec::new(),
            }
        }
        Err(e) => return Err(ApiError::ManifestInvalid(e.to_string())),
    };

    let mut digest = descriptor.digest;
    if is_digest(reference) {
        let expected =
            Digest::parse(reference).map_err(|e| ApiError::DigestInvalid(e.to_string()))?;
        if expected.algorithm() == digest.algorithm() && expected != digest {
            return Err(ApiError::DigestInvalid(format!(
                "manifest digest {digest} does not match reference {expected}"
            )));
        }
        digest = expected;
    }

    Ok(attach(
        req,
        ManifestInfo {
            project_id: project.project_id,
            repository: repository.to_string(),
            tag: reference.to_string(),
            digest,
            media_type: descriptor.media_type,
            size: descriptor.size,
            references: descriptor.references,
        },
    ))
}
