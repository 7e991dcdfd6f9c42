//! Chart version repository trait.

use crate::error::MetadataResult;
use async_trait::async_trait;

/// Repository for chart versions known to the proxy.
#[async_trait]
pub trait ChartRepo: Send + Sync {
    async fn chart_version_exists(
        &self,
        project_id: i64,
        chart_name: &str,
        version: &str,
    ) -> MetadataResult<bool>;

    /// Record a chart version. Recording twice is a no-op.
    async fn add_chart_version(
        &self,
        project_id: i64,
        chart_name: &str,
        version: &str,
    ) -> MetadataResult<()>;

    /// Returns `true` when a row was removed.
    async fn delete_chart_version(
        &self,
        project_id: i64,
        chart_name: &str,
        version: &str,
    ) -> MetadataResult<bool>;
}
