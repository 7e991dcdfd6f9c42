//! Common test utilities for quota tests.

use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tollgate_metadata::{MetadataStore, PostgresStore, SqliteStore};

/// Keeps whatever backs a test store alive.
#[allow(dead_code)]
pub enum Backing {
    Sqlite(TempDir),
    Postgres(ContainerAsync<Postgres>),
}

pub async fn sqlite_store() -> (Arc<dyn MetadataStore>, Backing) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = SqliteStore::new(temp_dir.path().join("quota.db"), None)
        .await
        .expect("Failed to open SQLite store");
    (Arc::new(store), Backing::Sqlite(temp_dir))
}

pub async fn postgres_store() -> Option<(Arc<dyn MetadataStore>, Backing)> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    let container = match Postgres::default().with_tag("15-alpine").start().await {
        Ok(container) => container,
        Err(err) => {
            eprintln!("Skipping PostgreSQL quota tests: {err}");
            return None;
        }
    };
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    let store = PostgresStore::new(&url, 20, None)
        .await
        .expect("Failed to open PostgreSQL store");
    Some((Arc::new(store), Backing::Postgres(container)))
}

/// Run a test against SQLite and, when available, PostgreSQL.
#[allow(dead_code)]
pub async fn run_quota_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let (sqlite, _backing) = sqlite_store().await;
    test_fn.clone()(sqlite).await;

    if let Some((postgres, _backing)) = postgres_store().await {
        test_fn(postgres).await;
    }
}
