//! Admin API: projects, quotas and immutable tag rules.
//!
//! Every route except `/health` sits behind the admin bearer token.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::LazyLock;
use time::OffsetDateTime;
use tollgate_core::{ImmutableRule, ResourceList};
use tollgate_metadata::models::ProjectRow;
use tollgate_metadata::repos::{ImmutableRuleRepo, ProjectRepo};
use tollgate_policy::SelectorRegistry;
use tollgate_quota::{Manager, PROJECT_REFERENCE, QuotaError};

/// Maximum admin request body size.
const MAX_ADMIN_BODY_SIZE: usize = 1024 * 1024;

static PROJECT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("project name pattern")
});

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - Health check endpoint (unauthenticated).
///
/// Reports ok only when both the metadata store and the lock store answer.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.kv.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    /// Defaults to the configured quota defaults.
    #[serde(default)]
    pub hard: Option<ResourceList>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuotaRequest {
    pub hard: ResourceList,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub hard: ResourceList,
    pub used: ResourceList,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub project_id: i64,
    pub name: String,
    pub owner_name: Option<String>,
    pub creation_time: String,
    pub quota: QuotaResponse,
}

impl ProjectResponse {
    fn new(project: ProjectRow, hard: ResourceList, used: ResourceList) -> Self {
        Self {
            project_id: project.project_id,
            name: project.name,
            owner_name: project.owner_name,
            creation_time: format_time(project.creation_time),
            quota: QuotaResponse { hard, used },
        }
    }
}

fn format_time(t: OffsetDateTime) -> String {
    t.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Project names become the first path component of their repositories.
fn validate_project_name(name: &str) -> ApiResult<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(ApiError::BadRequest(
            "project name must be 1-255 characters".to_string(),
        ));
    }
    if !PROJECT_NAME_RE.is_match(name) {
        return Err(ApiError::BadRequest(
            "project name must be lowercase alphanumeric, separated by '.', '_' or '-'"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_hard(state: &AppState, hard: &ResourceList) -> ApiResult<()> {
    let driver = state.drivers.driver(PROJECT_REFERENCE)?;
    driver
        .validate(hard)
        .map_err(|errors| QuotaError::InvalidHardLimits(errors).into())
}

async fn project_by_name(state: &AppState, name: &str) -> ApiResult<ProjectRow> {
    state
        .metadata
        .get_project_by_name(name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project '{name}' not found")))
}

/// POST /admin/v1/projects - Create a project and its quota.
pub async fn create_project(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    require_admin(&req)?;
    let body: CreateProjectRequest = read_json(req).await?;

    validate_project_name(&body.name)?;
    let hard = match body.hard {
        Some(hard) => hard,
        None => state.drivers.driver(PROJECT_REFERENCE)?.hard_limits(),
    };
    validate_hard(&state, &hard)?;

    let project = state
        .metadata
        .create_project(&body.name, body.owner_name.as_deref())
        .await?;

    let manager = Manager::new(
        state.metadata.clone(),
        PROJECT_REFERENCE,
        project.project_id.to_string(),
    );
    if let Err(e) = manager.new_quota(&hard, None).await {
        if let Err(cleanup) = state.metadata.delete_project(project.project_id).await {
            tracing::error!(
                project_id = project.project_id,
                error = %cleanup,
                "failed to remove project after quota creation failed"
            );
        }
        return Err(e.into());
    }

    tracing::info!(
        project_id = project.project_id,
        name = %project.name,
        hard = %hard,
        "project created"
    );

    let used = hard.zero();
    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse::new(project, hard, used)),
    ))
}

/// GET /admin/v1/projects/{name} - Project with its quota.
pub async fn get_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Request,
) -> ApiResult<Json<ProjectResponse>> {
    require_admin(&req)?;

    let project = project_by_name(&state, &name).await?;
    let quota = state
        .project_quota(project.project_id)
        .await?
        .get_quota()
        .await?;

    Ok(Json(ProjectResponse::new(project, quota.hard, quota.used)))
}

/// PUT /admin/v1/projects/{name}/quota - Replace the hard limits.
///
/// Limits below current usage are refused with 400.
pub async fn update_project_quota(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Request,
) -> ApiResult<Json<ProjectResponse>> {
    require_admin(&req)?;
    let body: UpdateQuotaRequest = read_json(req).await?;
    validate_hard(&state, &body.hard)?;

    let project = project_by_name(&state, &name).await?;
    let used = state
        .project_quota(project.project_id)
        .await?
        .update_hard_limits(&body.hard)
        .await?;

    Ok(Json(ProjectResponse::new(project, body.hard, used)))
}

/// GET /admin/v1/projects/{name}/immutable-rules
pub async fn list_immutable_rules(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<ImmutableRule>>> {
    require_admin(&req)?;
    let project = project_by_name(&state, &name).await?;
    let rules = state
        .metadata
        .list_immutable_rules(project.project_id)
        .await?;
    Ok(Json(rules))
}

/// POST /admin/v1/projects/{name}/immutable-rules
pub async fn create_immutable_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ImmutableRule>)> {
    require_admin(&req)?;
    let mut rule: ImmutableRule = read_json(req).await?;
    let project = project_by_name(&state, &name).await?;

    rule.validate()?;
    let selectors = SelectorRegistry::default();
    for selector in rule.tag_selectors.iter().chain(rule.repository_selectors()) {
        selectors
            .build(selector)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    rule.project_id = project.project_id;
    rule.id = state.metadata.create_immutable_rule(&rule).await?;

    tracing::info!(
        project_id = project.project_id,
        rule_id = rule.id,
        "immutable rule created"
    );

    Ok((StatusCode::CREATED, Json(rule)))
}

/// DELETE /admin/v1/projects/{name}/immutable-rules/{id}
pub async fn delete_immutable_rule(
    State(state): State<AppState>,
    Path((name, rule_id)): Path<(String, i64)>,
    req: Request,
) -> ApiResult<StatusCode> {
    require_admin(&req)?;
    let project = project_by_name(&state, &name).await?;

    if !state
        .metadata
        .delete_immutable_rule(project.project_id, rule_id)
        .await?
    {
        return Err(ApiError::NotFound(format!(
            "immutable rule {rule_id} not found"
        )));
    }

    tracing::info!(project_id = project.project_id, rule_id, "immutable rule deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_project_name() {
        validate_project_name("library").unwrap();
        validate_project_name("team-a.b_c").unwrap();
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("Library").is_err());
        assert!(validate_project_name("-lib").is_err());
        assert!(validate_project_name("a/b").is_err());
    }
}
