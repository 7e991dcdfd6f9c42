//! Throwaway quota databases for the metadata tests.

use std::fmt;
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tollgate_metadata::{MetadataStore, PostgresStore, SqliteStore};

/// Environment switch that keeps the Postgres pass from starting a container.
pub const SKIP_POSTGRES_ENV: &str = "SKIP_POSTGRES_TESTS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => f.write_str("sqlite"),
            Backend::Postgres => f.write_str("postgres"),
        }
    }
}

/// Dropping this removes the database file or stops the container.
#[allow(dead_code)]
enum Lease {
    File(TempDir),
    Container(ContainerAsync<Postgres>),
}

/// A fresh, empty tollgate schema on one backend.
pub struct ScratchStore {
    pub backend: Backend,
    pub store: Arc<dyn MetadataStore>,
    _lease: Lease,
}

impl ScratchStore {
    /// SQLite file under a temporary directory.
    pub async fn sqlite() -> Self {
        let dir = tempfile::tempdir().expect("temp dir for tollgate.db");
        let store = SqliteStore::new(dir.path().join("tollgate.db"), None)
            .await
            .expect("open SQLite store");
        Self {
            backend: Backend::Sqlite,
            store: Arc::new(store),
            _lease: Lease::File(dir),
        }
    }

    /// PostgreSQL in a container, or `None` when skipped or Docker is missing.
    pub async fn postgres() -> Option<Self> {
        if std::env::var_os(SKIP_POSTGRES_ENV).is_some() {
            return None;
        }
        let container = match Postgres::default().with_tag("15-alpine").start().await {
            Ok(container) => container,
            Err(err) => {
                eprintln!("postgres metadata tests skipped, container did not start: {err}");
                return None;
            }
        };
        let host = container.get_host().await.expect("container host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("container port");
        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::new(&url, 10, None)
            .await
            .expect("open PostgreSQL store");
        Some(Self {
            backend: Backend::Postgres,
            store: Arc::new(store),
            _lease: Lease::Container(container),
        })
    }
}

/// Run `test_fn` once per available backend, each on its own empty schema.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut scratches = vec![ScratchStore::sqlite().await];
    scratches.extend(ScratchStore::postgres().await);

    for scratch in &scratches {
        eprintln!("metadata test on {}", scratch.backend);
        test_fn(scratch.store.clone()).await;
    }
}
