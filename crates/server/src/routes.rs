//! Route configuration.

use crate::auth::{admin_auth_middleware, trace_middleware};
use crate::chain::registry_router;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Anything not matched by the health, admin or metrics routes falls through
/// to the registry middleware chain.
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/v1/projects",
            post(handlers::create_project),
        )
        .route("/admin/v1/projects/{name}", get(handlers::get_project))
        .route(
            "/admin/v1/projects/{name}/quota",
            put(handlers::update_project_quota),
        )
        .route(
            "/admin/v1/projects/{name}/immutable-rules",
            get(handlers::list_immutable_rules).post(handlers::create_immutable_rule),
        )
        .route(
            "/admin/v1/projects/{name}/immutable-rules/{rule_id}",
            delete(handlers::delete_immutable_rule),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    // Unauthenticated for load balancers and k8s health checks
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(admin_routes);

    // SECURITY: when enabled, /metrics must be network-restricted to the
    // Prometheus scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback_service(registry_router(state.clone()))
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
