//! Durable state behind the tollgate proxy.
//!
//! Quota rows are the only contended records: every charge or credit is a
//! read-modify-write of `quota_usage` under a row lock. Everything else
//! (projects, artifacts, blob links, chart versions, immutable tag rules) is
//! bookkeeping that lets hooks compute those charges and lets the proxy
//! answer catalog and policy questions without asking the upstream registry.
//!
//! [`from_config`] picks the backend: SQLite for a single proxy instance,
//! PostgreSQL when several instances share one quota ledger.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use tollgate_core::config::MetadataConfig;

const DEFAULT_PG_PORT: u16 = 5432;

/// Open the configured store, creating its schema if missing.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    let store: Arc<dyn MetadataStore> = match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "opening SQLite quota ledger");
            Arc::new(SqliteStore::new(path, *query_timeout_secs).await?)
        }
        MetadataConfig::Postgres {
            url: Some(url),
            max_connections,
            statement_timeout_ms,
            ..
        } => {
            tracing::info!(max_connections, "connecting to PostgreSQL quota ledger by URL");
            Arc::new(PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?)
        }
        MetadataConfig::Postgres {
            url: None,
            host: Some(host),
            database: Some(database),
            port,
            username,
            password,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let port = port.unwrap_or(DEFAULT_PG_PORT);
            tracing::info!(%host, port, %database, max_connections, "connecting to PostgreSQL quota ledger");
            Arc::new(
                PostgresStore::from_params(
                    host,
                    port,
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?,
            )
        }
        MetadataConfig::Postgres { .. } => {
            return Err(MetadataError::Config(
                "metadata.postgres needs either url, or host and database".to_string(),
            ));
        }
    };
    Ok(store)
}
