//! Tag immutability checks for manifest pushes and deletes.

use super::{Builder, manifest_info};
use crate::classify::Operation;
use crate::context::resolve_project;
use crate::error::{ApiError, ApiResult};
use crate::interceptor::{Interceptor, ResponseView};
use crate::metrics;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::Request;
use std::sync::Arc;
use tollgate_core::is_digest;
use tollgate_core::repository::parse_repository;
use tollgate_metadata::repos::ArtifactRepo;
use tollgate_policy::{Candidate, ImmutableMatcher};

/// Fails the request phase when any candidate is immutable.
pub struct ImmutableCheck {
    matcher: Arc<dyn ImmutableMatcher>,
    project_id: i64,
    candidates: Vec<Candidate>,
}

#[async_trait]
impl Interceptor for ImmutableCheck {
    async fn handle_request(&mut self, _req: &mut Request) -> ApiResult<()> {
        for candidate in &self.candidates {
            if self
                .matcher
                .is_immutable(self.project_id, candidate)
                .await?
            {
                metrics::IMMUTABLE_REJECTIONS.inc();
                tracing::info!(
                    project_id = self.project_id,
                    repository = %candidate.repository,
                    tag = %candidate.tag,
                    "rejected by immutable tag rule"
                );
                return Err(ApiError::Immutable {
                    repository: candidate.repository.clone(),
                    tag: candidate.tag.clone(),
                });
            }
        }
        Ok(())
    }

    async fn handle_response(&mut self, _response: ResponseView<'_>) {}
}

fn candidate(repository: &str, tag: &str) -> Candidate {
    let (_, name) = parse_repository(repository);
    Candidate::new(name, tag)
}

/// Overwriting an existing tag with a different digest.
pub struct ImmutablePushBuilder;

#[async_trait]
impl Builder for ImmutablePushBuilder {
    fn name(&self) -> &'static str {
        "immutable_push"
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
        if is_digest(reference) {
            return Ok(None);
        }

        let info = manifest_info(state, req, repository, reference).await?;
        let Some(existing) = state.metadata.get_artifact(repository, reference).await? else {
            return Ok(None);
        };
        if existing.digest == info.digest.to_string() {
            return Ok(None);
        }

        Ok(Some(Box::new(ImmutableCheck {
            matcher: state.matcher.clone(),
            project_id: info.project_id,
            candidates: vec![candidate(repository, reference)],
        })))
    }
}

/// Deleting a manifest that carries an immutable tag.
pub struct ImmutableDeleteBuilder;

#[async_trait]
impl Builder for ImmutableDeleteBuilder {
    fn name(&self) -> &'static str {
        "immutable_delete"
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

        let candidates: Vec<Candidate> = state
            .metadata
            .list_artifacts_by_digest(repository, &digest)
            .await?
            .into_iter()
            .filter(|artifact| !is_digest(&artifact.tag))
            .map(|artifact| candidate(repository, &artifact.tag))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        Ok(Some(Box::new(ImmutableCheck {
            matcher: state.matcher.clone(),
            project_id: project.project_id,
            candidates,
        })))
    }
}
