//! Request-scoped information attached as typed request extensions.
//!
//! The stage that first parses a request body or resolves a project stores
//! the result here; later stages read it instead of parsing again.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use std::sync::Arc;
use tollgate_core::Digest;
use tollgate_core::manifest::Descriptor;
use tollgate_core::repository::parse_repository;
use tollgate_metadata::models::ProjectRow;
use tollgate_metadata::repos::ProjectRepo;

/// A manifest being pushed or deleted.
#[derive(Clone, Debug)]
pub struct ManifestInfo {
    pub project_id: i64,
    pub repository: String,
    /// Tag, or the digest for by-digest references.
    pub tag: String,
    pub digest: Digest,
    pub media_type: String,
    pub size: i64,
    pub references: Vec<Descriptor>,
}

impl ManifestInfo {
    pub fn is_tagged(&self) -> bool {
        !tollgate_core::is_digest(&self.tag)
    }
}

/// A blob being completed or mounted.
#[derive(Clone, Debug)]
pub struct BlobInfo {
    pub project_id: i64,
    pub repository: String,
    pub digest: Digest,
    pub size: i64,
    pub content_type: String,
    /// Upload session, for completions.
    pub upload_uuid: Option<String>,
}

/// Image coordinates of a manifest pull, attached by the url stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub project_name: String,
    pub repository: String,
    pub reference: String,
    pub digest: Option<String>,
}

/// A chart version being uploaded or deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartInfo {
    pub project_id: i64,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

/// Look up the project owning `repository`.
pub async fn resolve_project(state: &AppState, repository: &str) -> ApiResult<ProjectRow> {
    let (namespace, _) = parse_repository(repository);
    if namespace.is_empty() {
        return Err(ApiError::NameUnknown(repository.to_string()));
    }
    state
        .metadata
        .get_project_by_name(namespace)
        .await?
        .ok_or_else(|| ApiError::NameUnknown(format!("project {namespace} not found")))
}

/// Buffer the request body up to `limit` bytes and put a copy back.
pub async fn buffer_body(req: &mut Request, limit: usize) -> ApiResult<Bytes> {
    let body = std::mem::replace(req.body_mut(), Body::empty());
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    *req.body_mut() = Body::from(bytes.clone());
    Ok(bytes)
}

/// Typed accessor for a shared request extension.
pub fn extension<T: Send + Sync + 'static>(req: &Request) -> Option<Arc<T>> {
    req.extensions().get::<Arc<T>>().cloned()
}

/// Attach `value` and return the shared handle.
pub fn attach<T: Send + Sync + 'static>(req: &mut Request, value: T) -> Arc<T> {
    let value = Arc::new(value);
    req.extensions_mut().insert(value.clone());
    value
}

/// String value of a request or response header.
pub fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
