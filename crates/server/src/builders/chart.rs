//! Chart upload and delete builders.

use super::Builder;
use crate::classify::Operation;
use crate::context::{ChartInfo, attach, buffer_body, header_str};
use crate::error::{ApiError, ApiResult};
use crate::interceptor::{
    Action, Interceptor, QuotaHooks, QuotaInterceptor, QuotaOptions, ResponseView,
};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use std::sync::Arc;
use tollgate_core::{ResourceList, ResourceName};
use tollgate_metadata::MetadataStore;
use tollgate_metadata::models::ProjectRow;
use tollgate_metadata::repos::{ChartRepo, ProjectRepo};

pub fn chart_lock_key(namespace: &str, name: &str, version: &str) -> String {
    format!("chart-lock::{namespace}:{name}:{version}")
}

async fn chart_project(state: &AppState, namespace: &str) -> ApiResult<ProjectRow> {
    state
        .metadata
        .get_project_by_name(namespace)
        .await?
        .ok_or_else(|| ApiError::NameUnknown(format!("project {namespace} not found")))
}

/// Charges a chart version upload.
pub struct ChartUploadBuilder;

#[async_trait]
impl Builder for ChartUploadBuilder {
    fn name(&self) -> &'static str {
        "chart_upload"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::ChartUpload { namespace } = op else {
            return Ok(None);
        };

        let project = chart_project(state, namespace).await?;
        let content_type = header_str(req.headers(), CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_string();
        let body = buffer_body(req, state.config.server.max_chart_size).await?;
        let chart = state.chart_inspector.inspect(&content_type, body).await?;

        let info = attach(
            req,
            ChartInfo {
                project_id: project.project_id,
                namespace: namespace.clone(),
                name: chart.name,
                version: chart.version,
            },
        );
        chart_interceptor(state, info, Action::Add, StatusCode::CREATED)
            .await
            .map(Some)
    }
}

/// Credits a chart version delete.
pub struct ChartDeleteBuilder;

#[async_trait]
impl Builder for ChartDeleteBuilder {
    fn name(&self) -> &'static str {
        "chart_delete"
    }

    async fn build(
        &self,
        state: &AppState,
        op: &Operation,
        req: &mut Request,
    ) -> ApiResult<Option<Box<dyn Interceptor>>> {
        let Operation::ChartDelete {
            namespace,
            name,
            version,
        } = op
        else {
            return Ok(None);
        };

        let project = chart_project(state, namespace).await?;
        let info = attach(
            req,
            ChartInfo {
                project_id: project.project_id,
                namespace: namespace.clone(),
                name: name.clone(),
                version: version.clone(),
            },
        );
        chart_interceptor(state, info, Action::Subtract, StatusCode::OK)
            .await
            .map(Some)
    }
}

async fn chart_interceptor(
    state: &AppState,
    info: Arc<ChartInfo>,
    action: Action,
    status_code: StatusCode,
) -> ApiResult<Box<dyn Interceptor>> {
    let manager = state.charging_quota(info.project_id).await?;
    let opts = QuotaOptions {
        action,
        manager,
        mutex_keys: vec![chart_lock_key(&info.namespace, &info.name, &info.version)],
        resources: None,
        status_code,
        hooks: Arc::new(ChartHooks {
            metadata: state.metadata.clone(),
            action,
            info,
        }),
    };
    Ok(Box::new(QuotaInterceptor::new(opts, state.locker.clone())))
}

struct ChartHooks {
    metadata: Arc<dyn MetadataStore>,
    action: Action,
    info: Arc<ChartInfo>,
}

impl ChartHooks {
    /// A failed lookup counts as "not present".
    async fn exists(&self) -> bool {
        let info = &self.info;
        match self
            .metadata
            .chart_version_exists(info.project_id, &info.name, &info.version)
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(
                    chart = %info.name,
                    version = %info.version,
                    error = %e,
                    "chart version lookup failed, treating as absent"
                );
                false
            }
        }
    }
}

#[async_trait]
impl QuotaHooks for ChartHooks {
    async fn resources(&self) -> ApiResult<Option<ResourceList>> {
        let exists = self.exists().await;
        let charge = match self.action {
            Action::Add => !exists,
            Action::Subtract => exists,
        };
        Ok(charge.then(|| ResourceList::new().with(ResourceName::Count, 1)))
    }

    async fn on_fulfilled(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        let info = &self.info;
        match self.action {
            Action::Add => {
                self.metadata
                    .add_chart_version(info.project_id, &info.name, &info.version)
                    .await?;
            }
            Action::Subtract => {
                self.metadata
                    .delete_chart_version(info.project_id, &info.name, &info.version)
                    .await?;
            }
        }
        tracing::info!(
            namespace = %info.namespace,
            chart = %info.name,
            version = %info.version,
            action = self.action.as_str(),
            "chart version recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_lock_key() {
        assert_eq!(
            chart_lock_key("library", "nginx", "1.0.0"),
            "chart-lock::library:nginx:1.0.0"
        );
    }
}
