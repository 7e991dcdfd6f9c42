//! Prometheus metrics for the tollgate proxy.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry operation and action labels only, never project or
//! repository names, but the endpoint should still be network-restricted
//! to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Quota reservations
pub static QUOTA_RESERVATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tollgate_quota_reservations_total",
            "Quota reservations made in the request phase, by action",
        ),
        &["action"],
    )
    .expect("metric creation failed")
});

pub static QUOTA_ROLLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_quota_rollbacks_total",
        "Reservations reversed because the upstream did not succeed",
    )
    .expect("metric creation failed")
});

pub static QUOTA_ROLLBACK_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_quota_rollback_failures_total",
        "Reservations that could not be reversed",
    )
    .expect("metric creation failed")
});

pub static QUOTA_OVERFLOWS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_quota_overflows_total",
        "Requests rejected because a hard limit would be exceeded",
    )
    .expect("metric creation failed")
});

// Policy
pub static IMMUTABLE_REJECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_immutable_rejections_total",
        "Requests rejected by an immutable tag rule",
    )
    .expect("metric creation failed")
});

// Locks
pub static LOCK_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tollgate_lock_failures_total",
            "Mutex acquisition or release failures, by phase",
        ),
        &["phase"],
    )
    .expect("metric creation failed")
});

// Hooks
pub static HOOK_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tollgate_hook_failures_total",
            "Response-phase hook failures, by hook",
        ),
        &["hook"],
    )
    .expect("metric creation failed")
});

// Upstream
pub static UPSTREAM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tollgate_upstream_duration_seconds",
            "Time until the upstream returned response headers",
        )
        .buckets(vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]),
    )
    .expect("metric creation failed")
});

pub static UPSTREAM_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_upstream_errors_total",
        "Upstream requests that failed before a response arrived",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(QUOTA_RESERVATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUOTA_ROLLBACKS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUOTA_ROLLBACK_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUOTA_OVERFLOWS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IMMUTABLE_REJECTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOCK_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HOOK_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPSTREAM_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPSTREAM_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the /metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a failed response-phase hook.
pub fn record_hook_failure(hook: &str) {
    HOOK_FAILURES.with_label_values(&[hook]).inc();
}
