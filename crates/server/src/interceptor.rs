//! Two-phase request interceptors.
//!
//! An interceptor runs once before the request is forwarded and once after
//! the upstream answered. The quota interceptor uses the two phases to
//! reserve usage speculatively and then either keep the reservation or hand
//! it back, depending on the upstream status.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tollgate_core::ResourceList;
use tokio::sync::oneshot;
use tollgate_kv::{Locker, Mutex, Release};
use tollgate_quota::Manager;

/// Status and headers of the response the client is about to receive.
#[derive(Clone, Copy, Debug)]
pub struct ResponseView<'a> {
    pub status: StatusCode,
    pub headers: &'a HeaderMap,
}

impl ResponseView<'_> {
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::context::header_str(self.headers, name)
    }
}

/// A request/response wrapper built for one matched request.
#[async_trait]
pub trait Interceptor: Send {
    /// Runs before the request is forwarded. An error aborts the request and
    /// must leave nothing held.
    async fn handle_request(&mut self, req: &mut Request) -> ApiResult<()>;

    /// Runs after the upstream (or an inner stage) produced a response.
    async fn handle_response(&mut self, response: ResponseView<'_>);
}

/// Direction of a quota change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add,
    Subtract,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }

    fn reversed(self) -> Self {
        match self {
            Self::Add => Self::Subtract,
            Self::Subtract => Self::Add,
        }
    }
}

/// Callbacks a builder attaches to a quota interceptor.
///
/// Response-phase hooks can only log failures; the response is already
/// decided by the time they run.
#[async_trait]
pub trait QuotaHooks: Send + Sync {
    /// Resources to reserve, computed after the mutexes are held. `None` or
    /// an empty list means nothing to reserve.
    async fn resources(&self) -> ApiResult<Option<ResourceList>> {
        Ok(None)
    }

    async fn on_fulfilled(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        Ok(())
    }

    async fn on_rejected(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        Ok(())
    }

    async fn on_finally(&self, _response: ResponseView<'_>) -> ApiResult<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
pub struct NoHooks;

impl QuotaHooks for NoHooks {}

/// How a quota interceptor should behave for one request.
pub struct QuotaOptions {
    pub action: Action,
    /// `None` when quota enforcement is off. Locks and hooks still run so
    /// artifact and blob bookkeeping stays current.
    pub manager: Option<Manager>,
    /// Acquired in order, released in reverse.
    pub mutex_keys: Vec<String>,
    /// Fixed resources. When `None` the hooks compute them.
    pub resources: Option<ResourceList>,
    /// Upstream status that commits the change.
    pub status_code: StatusCode,
    pub hooks: Arc<dyn QuotaHooks>,
}

/// Reserve, then commit or roll back, a quota change around a forwarded request.
pub struct QuotaInterceptor {
    opts: QuotaOptions,
    locker: Locker,
    held: Vec<Mutex>,
    reserved: Option<ResourceList>,
}

impl QuotaInterceptor {
    pub fn new(opts: QuotaOptions, locker: Locker) -> Self {
        Self {
            opts,
            locker,
            held: Vec::new(),
            reserved: None,
        }
    }

    async fn apply(
        manager: &Manager,
        action: Action,
        resources: &ResourceList,
    ) -> ApiResult<ResourceList> {
        let used = match action {
            Action::Add => manager.add_resources(resources).await?,
            Action::Subtract => manager.subtract_resources(resources).await?,
        };
        Ok(used)
    }

    async fn release_all(&mut self) {
        while let Some(mutex) = self.held.pop() {
            let key = mutex.key().to_string();
            match self.locker.release(mutex).await {
                Ok(Release::Released) => {}
                Ok(Release::NotOwner) => {
                    metrics::LOCK_FAILURES.with_label_values(&["release"]).inc();
                    tracing::warn!(key = %key, "mutex expired or was taken over before release");
                }
                Err(e) => {
                    metrics::LOCK_FAILURES.with_label_values(&["release"]).inc();
                    tracing::error!(key = %key, error = %e, "failed to release mutex");
                }
            }
        }
    }

    async fn reserve(&mut self) -> ApiResult<()> {
        for key in &self.opts.mutex_keys {
            match self.locker.acquire(key).await {
                Ok(mutex) => self.held.push(mutex),
                Err(e) => {
                    metrics::LOCK_FAILURES.with_label_values(&["acquire"]).inc();
                    return Err(e.into());
                }
            }
        }

        let Some(manager) = &self.opts.manager else {
            return Ok(());
        };
        let resources = match &self.opts.resources {
            Some(resources) => Some(resources.clone()),
            None => self.opts.hooks.resources().await?,
        };
        let Some(resources) = resources.filter(|r| !r.is_empty()) else {
            return Ok(());
        };

        match Self::apply(manager, self.opts.action, &resources).await {
            Ok(used) => {
                metrics::QUOTA_RESERVATIONS
                    .with_label_values(&[self.opts.action.as_str()])
                    .inc();
                tracing::debug!(
                    action = self.opts.action.as_str(),
                    reference_id = manager.reference_id(),
                    resources = %resources,
                    used = %used,
                    "quota reserved"
                );
                self.reserved = Some(resources);
                Ok(())
            }
            Err(e) => {
                if e.is_overflow() {
                    metrics::QUOTA_OVERFLOWS.inc();
                }
                Err(e)
            }
        }
    }

    async fn rollback(&mut self) {
        let (Some(manager), Some(resources)) = (&self.opts.manager, self.reserved.take()) else {
            return;
        };
        let action = self.opts.action.reversed();
        match Self::apply(manager, action, &resources).await {
            Ok(_) => {
                metrics::QUOTA_ROLLBACKS.inc();
                tracing::debug!(
                    reference_id = manager.reference_id(),
                    resources = %resources,
                    "quota reservation reversed"
                );
            }
            Err(e) => {
                metrics::QUOTA_ROLLBACK_FAILURES.inc();
                tracing::error!(
                    reference_id = manager.reference_id(),
                    resources = %resources,
                    error = %e,
                    "failed to reverse quota reservation"
                );
            }
        }
    }
}

fn log_hook(hook: &'static str, result: ApiResult<()>) {
    if let Err(e) = result {
        metrics::record_hook_failure(hook);
        tracing::error!(hook, error = %e, "quota hook failed");
    }
}

#[async_trait]
impl Interceptor for QuotaInterceptor {
    async fn handle_request(&mut self, _req: &mut Request) -> ApiResult<()> {
        let result = self.reserve().await;
        if result.is_err() {
            self.release_all().await;
        }
        result
    }

    async fn handle_response(&mut self, response: ResponseView<'_>) {
        let hooks = self.opts.hooks.clone();
        if response.status == self.opts.status_code {
            log_hook("on_fulfilled", hooks.on_fulfilled(response).await);
        } else {
            self.rollback().await;
            log_hook("on_rejected", hooks.on_rejected(response).await);
        }
        log_hook("on_finally", hooks.on_finally(response).await);
        self.release_all().await;
    }
}

/// Status the response phase sees when the client went away before the
/// upstream answered.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Run `interceptors` around `next`.
///
/// Request phases run in order. If one fails, the interceptors that already
/// succeeded see the error response in their response phase. Response phases
/// run in reverse order.
///
/// The interceptors run on their own task. If the caller's future is dropped
/// (the client disconnected) the upstream call is abandoned and the response
/// phases still run with [`CLIENT_CLOSED_REQUEST`], so reservations are
/// reversed and mutexes released.
pub async fn run_intercepted(
    interceptors: Vec<Box<dyn Interceptor>>,
    req: Request,
    next: Next,
) -> Response {
    let (disconnect, disconnected) = oneshot::channel::<()>();
    let task = tokio::spawn(intercepted(interceptors, req, next, disconnected));
    let result = task.await;
    drop(disconnect);

    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "intercepted request task failed");
            ApiError::Internal("request handling failed".to_string()).into_response()
        }
    }
}

async fn intercepted(
    interceptors: Vec<Box<dyn Interceptor>>,
    mut req: Request,
    next: Next,
    disconnected: oneshot::Receiver<()>,
) -> Response {
    let mut started: Vec<Box<dyn Interceptor>> = Vec::with_capacity(interceptors.len());

    for mut interceptor in interceptors {
        if let Err(e) = interceptor.handle_request(&mut req).await {
            let response = e.into_response();
            finish(&mut started, response.status(), response.headers()).await;
            return response;
        }
        started.push(interceptor);
    }

    let response = tokio::select! {
        response = next.run(req) => response,
        _ = disconnected => {
            tracing::info!("client disconnected, abandoning upstream request");
            let status = StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_GATEWAY);
            status.into_response()
        }
    };
    finish(&mut started, response.status(), response.headers()).await;
    response
}

async fn finish(started: &mut [Box<dyn Interceptor>], status: StatusCode, headers: &HeaderMap) {
    let view = ResponseView { status, headers };
    for interceptor in started.iter_mut().rev() {
        interceptor.handle_response(view).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tollgate_core::ResourceName;
    use tollgate_kv::{KvStore, MemoryStore, MutexOptions};
    use tollgate_metadata::{MetadataStore, SqliteStore};

    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<&'static str>>,
        resources: Option<ResourceList>,
    }

    #[async_trait]
    impl QuotaHooks for Recorder {
        async fn resources(&self) -> ApiResult<Option<ResourceList>> {
            self.calls.lock().unwrap().push("resources");
            Ok(self.resources.clone())
        }

        async fn on_fulfilled(&self, _response: ResponseView<'_>) -> ApiResult<()> {
            self.calls.lock().unwrap().push("fulfilled");
            Ok(())
        }

        async fn on_rejected(&self, _response: ResponseView<'_>) -> ApiResult<()> {
            self.calls.lock().unwrap().push("rejected");
            Err(ApiError::Internal("hook failure is only logged".to_string()))
        }

        async fn on_finally(&self, _response: ResponseView<'_>) -> ApiResult<()> {
            self.calls.lock().unwrap().push("finally");
            Ok(())
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        manager: Manager,
        kv: Arc<dyn KvStore>,
        locker: Locker,
    }

    async fn fixture(hard: ResourceList) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("meta.db"), None).await.unwrap());
        let manager = Manager::new(store, "project", "1");
        manager.new_quota(&hard, None).await.unwrap();

        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let locker = Locker::for_quota(
            kv.clone(),
            MutexOptions {
                retry_count: 0,
                retry_delay: std::time::Duration::from_millis(1),
                ..MutexOptions::default()
            },
        );
        Fixture {
            _temp: temp,
            manager,
            kv,
            locker,
        }
    }

    fn options(
        fx: &Fixture,
        action: Action,
        resources: Option<ResourceList>,
        hooks: Arc<dyn QuotaHooks>,
    ) -> QuotaOptions {
        QuotaOptions {
            action,
            manager: Some(fx.manager.clone()),
            mutex_keys: vec!["manifest-lock::proj/img:latest".to_string()],
            resources,
            status_code: StatusCode::CREATED,
            hooks,
        }
    }

    fn view(status: StatusCode, headers: &HeaderMap) -> ResponseView<'_> {
        ResponseView { status, headers }
    }

    fn storage(n: i64) -> ResourceList {
        ResourceList::new().with(ResourceName::Storage, n)
    }

    fn hard() -> ResourceList {
        ResourceList::new()
            .with(ResourceName::Count, 10)
            .with(ResourceName::Storage, 1000)
    }

    #[tokio::test]
    async fn test_commit_on_success_status() {
        let fx = fixture(hard()).await;
        let hooks = Arc::new(Recorder::default());
        let mut interceptor = QuotaInterceptor::new(
            options(&fx, Action::Add, Some(storage(100)), hooks.clone()),
            fx.locker.clone(),
        );

        interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap();
        assert!(
            fx.kv
                .get("Quota::manifest-lock::proj/img:latest")
                .await
                .unwrap()
                .is_some()
        );

        let headers = HeaderMap::new();
        interceptor
            .handle_response(view(StatusCode::CREATED, &headers))
            .await;

        let quota = fx.manager.get_quota().await.unwrap();
        assert_eq!(quota.used.get(ResourceName::Storage), Some(100));
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["fulfilled", "finally"]);
        assert!(
            fx.kv
                .get("Quota::manifest-lock::proj/img:latest")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rollback_on_other_status() {
        let fx = fixture(hard()).await;
        let hooks = Arc::new(Recorder::default());
        let mut interceptor = QuotaInterceptor::new(
            options(&fx, Action::Add, Some(storage(100)), hooks.clone()),
            fx.locker.clone(),
        );

        interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap();
        let headers = HeaderMap::new();
        interceptor
            .handle_response(view(StatusCode::INTERNAL_SERVER_ERROR, &headers))
            .await;

        let quota = fx.manager.get_quota().await.unwrap();
        assert_eq!(quota.used.get(ResourceName::Storage), Some(0));
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["rejected", "finally"]);
    }

    #[tokio::test]
    async fn test_overflow_releases_locks() {
        let fx = fixture(hard()).await;
        let mut interceptor = QuotaInterceptor::new(
            options(&fx, Action::Add, Some(storage(1500)), Arc::new(NoHooks)),
            fx.locker.clone(),
        );

        let err = interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap_err();
        assert!(err.is_overflow());
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(
            fx.kv
                .get("Quota::manifest-lock::proj/img:latest")
                .await
                .unwrap()
                .is_none()
        );
        let quota = fx.manager.get_quota().await.unwrap();
        assert_eq!(quota.used.get(ResourceName::Storage), Some(0));
    }

    #[tokio::test]
    async fn test_lazy_resources_empty_skips_reservation() {
        let fx = fixture(hard()).await;
        let hooks = Arc::new(Recorder {
            resources: Some(ResourceList::new()),
            ..Recorder::default()
        });
        let mut interceptor = QuotaInterceptor::new(
            options(&fx, Action::Add, None, hooks.clone()),
            fx.locker.clone(),
        );

        interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap();
        let headers = HeaderMap::new();
        interceptor
            .handle_response(view(StatusCode::BAD_GATEWAY, &headers))
            .await;

        let quota = fx.manager.get_quota().await.unwrap();
        assert!(quota.used.is_zero());
        assert_eq!(
            *hooks.calls.lock().unwrap(),
            vec!["resources", "rejected", "finally"]
        );
    }

    #[tokio::test]
    async fn test_lock_contention_fails_closed() {
        let fx = fixture(hard()).await;
        let held = fx
            .locker
            .acquire("manifest-lock::proj/img:latest")
            .await
            .unwrap();

        let mut interceptor = QuotaInterceptor::new(
            options(&fx, Action::Add, Some(storage(1)), Arc::new(NoHooks)),
            fx.locker.clone(),
        );
        let err = interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(fx.locker.release(held).await.unwrap(), Release::Released);
    }

    #[tokio::test]
    async fn test_subtract_rollback_restores_usage() {
        let fx = fixture(hard()).await;
        fx.manager.add_resources(&storage(300)).await.unwrap();
        let mut interceptor = QuotaInterceptor::new(
            QuotaOptions {
                status_code: StatusCode::ACCEPTED,
                ..options(&fx, Action::Subtract, Some(storage(300)), Arc::new(NoHooks))
            },
            fx.locker.clone(),
        );

        interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap();
        assert_eq!(
            fx.manager.get_quota().await.unwrap().used.get(ResourceName::Storage),
            Some(0)
        );

        let headers = HeaderMap::new();
        interceptor
            .handle_response(view(StatusCode::NOT_FOUND, &headers))
            .await;
        assert_eq!(
            fx.manager.get_quota().await.unwrap().used.get(ResourceName::Storage),
            Some(300)
        );
    }

    #[tokio::test]
    async fn test_without_manager_only_runs_hooks() {
        let fx = fixture(hard()).await;
        let hooks = Arc::new(Recorder {
            resources: Some(storage(5000)),
            ..Recorder::default()
        });
        let mut interceptor = QuotaInterceptor::new(
            QuotaOptions {
                manager: None,
                ..options(&fx, Action::Add, None, hooks.clone())
            },
            fx.locker.clone(),
        );

        interceptor
            .handle_request(&mut Request::new(axum::body::Body::empty()))
            .await
            .unwrap();
        assert!(
            fx.kv
                .get("Quota::manifest-lock::proj/img:latest")
                .await
                .unwrap()
                .is_some()
        );
        let headers = HeaderMap::new();
        interceptor
            .handle_response(view(StatusCode::CREATED, &headers))
            .await;

        assert!(fx.manager.get_quota().await.unwrap().used.is_zero());
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["fulfilled", "finally"]);
        assert!(
            fx.kv
                .get("Quota::manifest-lock::proj/img:latest")
                .await
                .unwrap()
                .is_none()
        );
    }
}
