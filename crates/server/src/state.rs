//! Application state shared across stages and handlers.

use crate::chart::{ChartInspector, DefaultChartInspector};
use crate::error::ApiResult;
use std::sync::Arc;
use tollgate_core::config::AppConfig;
use tollgate_core::{DefaultManifestInspector, ManifestInspector};
use tollgate_kv::{KvStore, Locker, MutexOptions, UploadSizes};
use tollgate_metadata::MetadataStore;
use tollgate_policy::{ImmutableMatcher, RuleMatcher, SelectorRegistry};
use tollgate_quota::{DriverRegistry, Manager, PROJECT_REFERENCE};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Lock store backing mutexes and upload size entries.
    pub kv: Arc<dyn KvStore>,
    /// Quota mutexes.
    pub locker: Locker,
    /// Per-upload byte counts recorded on PATCH.
    pub uploads: UploadSizes,
    /// Quota drivers, built once at start-up.
    pub drivers: Arc<DriverRegistry>,
    pub matcher: Arc<dyn ImmutableMatcher>,
    pub manifest_inspector: Arc<dyn ManifestInspector>,
    pub chart_inspector: Arc<dyn ChartInspector>,
    /// Client used by the reverse proxy.
    pub http: reqwest::Client,
}

impl AppState {
    /// Create application state with the default drivers, matcher and inspectors.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        kv: Arc<dyn KvStore>,
    ) -> ApiResult<Self> {
        let locker = Locker::for_quota(kv.clone(), MutexOptions::from(&config.lock_store));
        let uploads = UploadSizes::new(kv.clone(), config.lock_store.upload_size_ttl());
        let drivers = tollgate_quota::default_registry(metadata.clone(), &config.quota);
        let matcher = RuleMatcher::new(metadata.clone(), SelectorRegistry::default());

        let mut http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(32);
        if let Some(timeout) = config.registry.request_timeout() {
            http = http.timeout(timeout);
        }
        let http = http
            .build()
            .map_err(|e| crate::error::ApiError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            metadata,
            kv,
            locker,
            uploads,
            drivers: Arc::new(drivers),
            matcher: Arc::new(matcher),
            manifest_inspector: Arc::new(DefaultManifestInspector),
            chart_inspector: Arc::new(DefaultChartInspector),
            http,
        })
    }

    /// Replace the immutability matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn ImmutableMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Quota manager for a project, creating its quota with the driver's
    /// default hard limits if the project has none yet.
    pub async fn project_quota(&self, project_id: i64) -> ApiResult<Manager> {
        let driver = self.drivers.driver(PROJECT_REFERENCE)?;
        let manager = Manager::new(
            self.metadata.clone(),
            PROJECT_REFERENCE,
            project_id.to_string(),
        );
        manager.ensure_quota(&driver.hard_limits()).await?;
        Ok(manager)
    }

    /// Manager to charge for a project, or `None` when quota enforcement is
    /// disabled.
    pub async fn charging_quota(&self, project_id: i64) -> ApiResult<Option<Manager>> {
        if !self.config.quota.enabled {
            return Ok(None);
        }
        self.project_quota(project_id).await.map(Some)
    }
}
