//! The `project` quota driver.

use crate::driver::{Driver, RefObject};
use crate::error::{QuotaError, QuotaResult};
use async_trait::async_trait;
use std::sync::Arc;
use tollgate_core::config::QuotaConfig;
use tollgate_core::{ResourceList, ResourceName};
use tollgate_metadata::MetadataStore;
use tollgate_metadata::repos::ProjectRepo;

/// Reference name for project quotas.
pub const PROJECT_REFERENCE: &str = "project";

/// Accounts `count` and `storage` per project. Reference ids are project ids.
pub struct ProjectDriver {
    store: Arc<dyn MetadataStore>,
    defaults: ResourceList,
}

impl ProjectDriver {
    pub fn new(store: Arc<dyn MetadataStore>, defaults: ResourceList) -> Self {
        Self { store, defaults }
    }

    pub fn from_config(store: Arc<dyn MetadataStore>, config: &QuotaConfig) -> Self {
        Self::new(store, config.default_hard_limits())
    }
}

#[async_trait]
impl Driver for ProjectDriver {
    fn name(&self) -> &str {
        PROJECT_REFERENCE
    }

    fn resources(&self) -> &[ResourceName] {
        &ResourceName::ALL
    }

    fn hard_limits(&self) -> ResourceList {
        self.defaults.clone()
    }

    async fn load(&self, key: &str) -> QuotaResult<RefObject> {
        let not_found = || QuotaError::ReferenceNotFound {
            driver: PROJECT_REFERENCE.to_string(),
            key: key.to_string(),
        };
        let project_id: i64 = key.parse().map_err(|_| not_found())?;
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(not_found)?;

        let mut object = RefObject::new();
        object.insert("id".to_string(), project.project_id.into());
        object.insert("name".to_string(), project.name.into());
        object.insert(
            "owner_name".to_string(),
            project
                .owner_name
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        );
        Ok(object)
    }
}
