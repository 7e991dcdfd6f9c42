//! Project repository trait.

use crate::error::MetadataResult;
use crate::models::ProjectRow;
use async_trait::async_trait;

/// Repository for projects.
///
/// A project's quota lives in the quota tables under
/// `("project", project_id)` and is created separately.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Returns `AlreadyExists` when the name is taken.
    async fn create_project(&self, name: &str, owner_name: Option<&str>)
    -> MetadataResult<ProjectRow>;

    /// Remove a project. Returns `false` when it did not exist.
    async fn delete_project(&self, project_id: i64) -> MetadataResult<bool>;

    async fn get_project(&self, project_id: i64) -> MetadataResult<Option<ProjectRow>>;

    async fn get_project_by_name(&self, name: &str) -> MetadataResult<Option<ProjectRow>>;

    async fn list_projects(&self) -> MetadataResult<Vec<ProjectRow>>;
}
