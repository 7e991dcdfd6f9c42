//! HTTP server for the tollgate registry proxy.
//!
//! This crate provides:
//! - The registry middleware chain (read-only gate, URL enrichment, quota and
//!   immutability enforcement)
//! - Streaming reverse proxy to the upstream registry and chart repository
//! - Admin endpoints for projects, quotas and immutable rules
//! - Prometheus metrics

pub mod auth;
pub mod builders;
pub mod chain;
pub mod chart;
pub mod classify;
pub mod context;
pub mod error;
pub mod handlers;
pub mod interceptor;
pub mod metrics;
pub mod proxy;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
