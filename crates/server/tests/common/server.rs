//! Server test utilities.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use httpmock::MockServer;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tollgate_core::ResourceList;
use tollgate_core::config::{AppConfig, MetadataConfig};
use tollgate_kv::{KvStore, MemoryStore};
use tollgate_metadata::repos::QuotaRepo;
use tollgate_metadata::{MetadataStore, SqliteStore};
use tollgate_server::{AppState, create_router};
use tower::ServiceExt;

/// Raw admin token whose hash is in `AdminConfig::for_testing`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// True when the sandbox allows binding a local port for the mock upstream.
#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

/// A proxy under test, wired to a mock upstream registry.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub upstream: MockServer,
    _temp_dir: TempDir,
}

/// A buffered proxy response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with SQLite metadata and in-memory locks.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let upstream = MockServer::start_async().await;
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("metadata.db");

        let mut config = AppConfig::for_testing(upstream.base_url());
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

        let state = AppState::new(config, metadata, kv).expect("Failed to build app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            upstream,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Send a request through the full router and buffer the response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a request with the given headers and body.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(body.into()).unwrap()).await
    }

    /// Call an admin endpoint with the test admin token.
    pub async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
        let auth = format!("Bearer {ADMIN_TOKEN}");
        match body {
            Some(v) => {
                self.request(
                    method,
                    uri,
                    &[
                        ("Authorization", auth.as_str()),
                        ("Content-Type", "application/json"),
                    ],
                    serde_json::to_vec(&v).unwrap(),
                )
                .await
            }
            None => {
                self.request(method, uri, &[("Authorization", auth.as_str())], Body::empty())
                    .await
            }
        }
    }

    /// Create a project through the admin API and return its id.
    pub async fn create_project(&self, name: &str, hard: Option<Value>) -> i64 {
        let mut body = json!({ "name": name });
        if let Some(hard) = hard {
            body["hard"] = hard;
        }
        let response = self.admin("POST", "/admin/v1/projects", Some(body)).await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "project creation failed: {}",
            String::from_utf8_lossy(&response.body)
        );
        response.json()["project_id"].as_i64().unwrap()
    }

    /// Current usage of a project's quota.
    pub async fn usage(&self, project_id: i64) -> ResourceList {
        self.metadata()
            .get_quota("project", &project_id.to_string())
            .await
            .unwrap()
            .expect("project quota exists")
            .used
    }
}
