//! The registry middleware chain.
//!
//! Stages are named and wrapped around the reverse proxy in a fixed order.
//! Every stage may short-circuit with an error response or pass the request
//! on; interceptor stages also see the response on its way back.

use crate::builders::{BLOB_BUILDERS, Builder, IMMUTABLE_BUILDERS, REGISTRY_BUILDERS, build_first};
use crate::classify::{Operation, classify, merge_slashes};
use crate::context::{ImageInfo, attach, extension, header_str};
use crate::error::{ApiError, ApiResult};
use crate::interceptor::run_intercepted;
use crate::proxy::reverse_proxy;
use crate::state::AppState;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tollgate_core::is_digest;
use tollgate_core::manifest::is_manifest_list;
use tollgate_core::repository::parse_repository;
use tollgate_metadata::repos::ArtifactRepo;

/// Stage names, outermost first.
pub const STAGES: &[&str] = &[
    "readonly",
    "url",
    "multiple-manifest",
    "list-repo",
    "content-trust",
    "vulnerability",
    "blob-quota",
    "registry-quota",
    "reverse-proxy",
];

/// Largest catalog body the list-repo stage will rewrite.
const MAX_CATALOG_SIZE: usize = 16 * 1024 * 1024;

/// Router that runs every registry request through [`STAGES`].
///
/// # Panics
///
/// Panics if a stage name is unknown.
pub fn registry_router(state: AppState) -> Router {
    chain(state, STAGES)
}

pub(crate) fn chain(state: AppState, stages: &[&str]) -> Router {
    let mut router: Router<AppState> = Router::new().fallback(reverse_proxy);
    for stage in stages.iter().rev() {
        router = apply_stage(router, stage, &state);
    }
    router
        .layer(middleware::map_request(normalize_path))
        .with_state(state)
}

fn apply_stage(router: Router<AppState>, stage: &str, state: &AppState) -> Router<AppState> {
    let state = state.clone();
    match stage {
        "readonly" => router.layer(middleware::from_fn_with_state(state, readonly)),
        "url" => router.layer(middleware::from_fn_with_state(state, url_enrichment)),
        "multiple-manifest" => router.layer(middleware::from_fn(multiple_manifest)),
        "list-repo" => router.layer(middleware::from_fn_with_state(state, list_repo)),
        "content-trust" => router.layer(middleware::from_fn(content_trust)),
        "vulnerability" => router.layer(middleware::from_fn(vulnerability)),
        "blob-quota" => router.layer(middleware::from_fn_with_state(state, blob_quota)),
        "registry-quota" => router.layer(middleware::from_fn_with_state(state, registry_quota)),
        "reverse-proxy" => router,
        other => panic!("unknown middleware stage: {other}"),
    }
}

async fn normalize_path(mut req: Request) -> Request {
    if !req.uri().path().contains("//") {
        return req;
    }
    let merged = merge_slashes(req.uri().path());
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{merged}?{query}"),
        None => merged,
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = path_and_query.parse().ok();
    if let Ok(uri) = Uri::from_parts(parts) {
        *req.uri_mut() = uri;
    }
    req
}

async fn readonly(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mutating = matches!(
        *req.method(),
        Method::DELETE | Method::POST | Method::PATCH | Method::PUT
    );
    if state.config.server.read_only && mutating {
        return ApiError::Denied("the registry is in read-only mode".to_string()).into_response();
    }
    next.run(req).await
}

async fn image_info(state: &AppState, repository: &str, reference: &str) -> ApiResult<ImageInfo> {
    let (project, _) = parse_repository(repository);
    if project.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "repository {repository} has no project component"
        )));
    }

    let digest = if is_digest(reference) {
        Some(reference.to_string())
    } else {
        match state.metadata.get_artifact(repository, reference).await {
            Ok(artifact) => artifact.map(|a| a.digest),
            Err(e) => {
                tracing::warn!(repository, reference, error = %e, "artifact lookup failed");
                None
            }
        }
    };

    Ok(ImageInfo {
        project_name: project.to_string(),
        repository: repository.to_string(),
        reference: reference.to_string(),
        digest,
    })
}

async fn url_enrichment(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if let Some(Operation::PullManifest {
        repository,
        reference,
    }) = classify(req.method(), req.uri())
    {
        match image_info(&state, &repository, &reference).await {
            Ok(info) => {
                attach(&mut req, info);
            }
            Err(e) => return e.into_response(),
        }
    }
    next.run(req).await
}

async fn multiple_manifest(req: Request, next: Next) -> Response {
    if let Some(Operation::PushManifest { .. }) = classify(req.method(), req.uri()) {
        let content_type = header_str(req.headers(), CONTENT_TYPE.as_str()).unwrap_or_default();
        if is_manifest_list(content_type) {
            return ApiError::UnsupportedMediaType(format!(
                "manifest lists are not accepted: {content_type}"
            ))
            .into_response();
        }
    }
    next.run(req).await
}

#[derive(Deserialize, Serialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

async fn list_repo(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if classify(req.method(), req.uri()) != Some(Operation::CatalogList) {
        return next.run(req).await;
    }
    let response = next.run(req).await;
    if response.status() != StatusCode::OK {
        return response;
    }
    match filter_catalog(&state, response).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn filter_catalog(state: &AppState, response: Response) -> ApiResult<Response> {
    let (mut parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_CATALOG_SIZE)
        .await
        .map_err(|e| ApiError::Upstream(format!("failed to read catalog: {e}")))?;
    let mut catalog: Catalog = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Upstream(format!("invalid catalog: {e}")))?;

    let known: HashSet<String> = state.metadata.list_repositories().await?.into_iter().collect();
    catalog.repositories.retain(|repo| known.contains(repo));

    let body = serde_json::to_vec(&catalog)
        .map_err(|e| ApiError::Internal(format!("failed to encode catalog: {e}")))?;
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Ok(Response::from_parts(parts, Body::from(body)))
}

async fn content_trust(req: Request, next: Next) -> Response {
    if let Some(image) = extension::<ImageInfo>(&req) {
        tracing::trace!(
            repository = %image.repository,
            reference = %image.reference,
            "content trust not enforced"
        );
    }
    next.run(req).await
}

async fn vulnerability(req: Request, next: Next) -> Response {
    if let Some(image) = extension::<ImageInfo>(&req) {
        tracing::trace!(
            repository = %image.repository,
            digest = ?image.digest,
            "vulnerability policy not enforced"
        );
    }
    next.run(req).await
}

/// Runs with quota enforcement off as well; the interceptors then only keep
/// blob bookkeeping.
async fn blob_quota(State(state): State<AppState>, req: Request, next: Next) -> Response {
    intercept(&state, &[BLOB_BUILDERS], req, next).await
}

async fn registry_quota(State(state): State<AppState>, req: Request, next: Next) -> Response {
    intercept(&state, &[IMMUTABLE_BUILDERS, REGISTRY_BUILDERS], req, next).await
}

/// Build one interceptor per group and run them around `next`.
async fn intercept(
    state: &AppState,
    groups: &[&[&dyn Builder]],
    mut req: Request,
    next: Next,
) -> Response {
    let Some(op) = classify(req.method(), req.uri()) else {
        return next.run(req).await;
    };

    let mut interceptors = Vec::with_capacity(groups.len());
    for group in groups {
        match build_first(group, state, &op, &mut req).await {
            Ok(Some(interceptor)) => interceptors.push(interceptor),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(operation = op.name(), error = %e, "interceptor build failed");
                return e.into_response();
            }
        }
    }

    if interceptors.is_empty() {
        return next.run(req).await;
    }
    run_intercepted(interceptors, req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_normalize_path_merges_slashes() {
        let req = Request::builder()
            .uri("/v2//proj///img/manifests/latest?x=1")
            .body(Body::empty())
            .unwrap();
        let req = normalize_path(req).await;
        assert_eq!(req.uri().path(), "/v2/proj/img/manifests/latest");
        assert_eq!(req.uri().query(), Some("x=1"));
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(STAGES.first(), Some(&"readonly"));
        assert_eq!(STAGES.last(), Some(&"reverse-proxy"));
        let quota = STAGES.iter().position(|s| *s == "registry-quota").unwrap();
        let blob = STAGES.iter().position(|s| *s == "blob-quota").unwrap();
        assert!(blob < quota);
    }
}
