//! Configuration types shared across crates.

use crate::resources::{ResourceList, ResourceName, UNLIMITED};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP front-end configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Reject every mutating registry request with 403.
    #[serde(default)]
    pub read_only: bool,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Largest manifest body buffered for inspection, in bytes.
    #[serde(default = "default_max_manifest_size")]
    pub max_manifest_size: usize,
    /// Largest chart upload buffered for inspection, in bytes.
    #[serde(default = "default_max_chart_size")]
    pub max_chart_size: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_manifest_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_chart_size() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            read_only: false,
            metrics_enabled: default_metrics_enabled(),
            max_manifest_size: default_max_manifest_size(),
            max_chart_size: default_max_chart_size(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_manifest_size == 0 {
            return Err("server.max_manifest_size cannot be 0".to_string());
        }
        if self.max_chart_size == 0 {
            return Err("server.max_chart_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Upstream registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the distribution registry (e.g., "http://registry:5000").
    pub upstream_url: String,
    /// Base URL of the chart repository. Falls back to `upstream_url`.
    #[serde(default)]
    pub chart_upstream_url: Option<String>,
    /// Whole-request timeout for upstream calls. No timeout when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl RegistryConfig {
    /// Upstream for chart API calls.
    pub fn chart_upstream(&self) -> &str {
        self.chart_upstream_url
            .as_deref()
            .unwrap_or(&self.upstream_url)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        let urls = std::iter::once(self.upstream_url.as_str()).chain(self.chart_upstream_url.as_deref());
        for url in urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!(
                    "registry upstream '{url}' must start with http:// or https://"
                ));
            }
        }
        if self.request_timeout_secs == Some(0) {
            return Err("registry.request_timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Advisory query timeout in seconds. Slow queries are logged, not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer TOLLGATE_METADATA__PASSWORD over storing it in the file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Server-side statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/tollgate.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Lock store backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LockBackendConfig {
    /// Redis server (required for multi-instance deployments).
    Redis {
        /// Connection URL (e.g., "redis://127.0.0.1:6379/0").
        url: String,
    },
    /// In-process store. Locks are not shared between instances.
    #[default]
    Memory,
}

/// Lock store and mutex tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockStoreConfig {
    /// Backend selection, e.g. `[lock_store.backend] type = "redis"`.
    #[serde(default)]
    pub backend: LockBackendConfig,
    /// Lifetime of an acquired mutex in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Acquisition attempts after the first one fails.
    #[serde(default = "default_lock_retry_count")]
    pub lock_retry_count: u32,
    /// Pause between acquisition attempts in milliseconds.
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
    /// Lifetime of per-upload size entries in seconds.
    #[serde(default = "default_upload_size_ttl_secs")]
    pub upload_size_ttl_secs: u64,
    /// How often the memory backend drops expired entries, in seconds.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_lock_retry_count() -> u32 {
    5
}

fn default_lock_retry_delay_ms() -> u64 {
    5000
}

fn default_upload_size_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_purge_interval_secs() -> u64 {
    60
}

impl Default for LockStoreConfig {
    fn default() -> Self {
        Self {
            backend: LockBackendConfig::default(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_retry_count: default_lock_retry_count(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            upload_size_ttl_secs: default_upload_size_ttl_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl LockStoreConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn upload_size_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_size_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lock_ttl_secs == 0 {
            return Err("lock_store.lock_ttl_secs cannot be 0".to_string());
        }
        if self.upload_size_ttl_secs == 0 {
            return Err("lock_store.upload_size_ttl_secs cannot be 0".to_string());
        }
        if self.purge_interval_secs == 0 {
            return Err("lock_store.purge_interval_secs cannot be 0".to_string());
        }
        if let LockBackendConfig::Redis { url } = &self.backend
            && !(url.starts_with("redis://") || url.starts_with("rediss://"))
        {
            return Err(format!(
                "lock_store url '{url}' must start with redis:// or rediss://"
            ));
        }
        Ok(())
    }
}

/// Quota enforcement settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// When false nothing is charged. Immutability and artifact bookkeeping
    /// still apply.
    #[serde(default = "default_quota_enabled")]
    pub enabled: bool,
    /// Default artifact count limit for new projects (-1 = unlimited).
    #[serde(default = "default_unlimited")]
    pub default_count: i64,
    /// Default storage limit in bytes for new projects (-1 = unlimited).
    #[serde(default = "default_unlimited")]
    pub default_storage: i64,
}

fn default_quota_enabled() -> bool {
    true
}

fn default_unlimited() -> i64 {
    UNLIMITED
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: default_quota_enabled(),
            default_count: default_unlimited(),
            default_storage: default_unlimited(),
        }
    }
}

impl QuotaConfig {
    /// Default hard limits as a resource list.
    pub fn default_hard_limits(&self) -> ResourceList {
        ResourceList::new()
            .with(ResourceName::Count, self.default_count)
            .with(ResourceName::Storage, self.default_storage)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("default_count", self.default_count),
            ("default_storage", self.default_storage),
        ] {
            if value != UNLIMITED && value <= 0 {
                return Err(format!(
                    "quota.{name} must be positive or -1 (unlimited), got {value}"
                ));
            }
        }
        Ok(())
    }
}

/// Admin token configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// SHA-256 hex of the admin bearer token.
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// **For testing only.** SHA-256 of "test-admin-token".
    pub fn for_testing() -> Self {
        Self {
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.token_hash.len() != 64 || !self.token_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err("admin.token_hash must be 64 hex characters".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub lock_store: LockStoreConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    pub admin: AdminConfig,
}

impl AppConfig {
    /// **For testing only.** SQLite metadata, in-memory locks with short
    /// retry delays, and the test admin token.
    pub fn for_testing(upstream_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            registry: RegistryConfig {
                upstream_url: upstream_url.into(),
                chart_upstream_url: None,
                request_timeout_secs: None,
            },
            metadata: MetadataConfig::default(),
            lock_store: LockStoreConfig {
                lock_retry_count: 1,
                lock_retry_delay_ms: 10,
                ..LockStoreConfig::default()
            },
            quota: QuotaConfig::default(),
            admin: AdminConfig::for_testing(),
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.registry.validate()?;
        self.metadata.validate()?;
        self.lock_store.validate()?;
        self.quota.validate()?;
        self.admin.validate()?;
        Ok(())
    }
}
