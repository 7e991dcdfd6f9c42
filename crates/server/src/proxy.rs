//! Reverse proxy to the upstream registry and chart repository.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use std::time::Instant;

const CHART_API_PREFIX: &str = "/api/chartrepo/";

/// Headers that describe one connection and must not be forwarded.
static HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Join `base` and `path_and_query` with exactly one slash between them.
pub fn join_url(base: &str, path_and_query: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path_and_query.trim_start_matches('/')
    )
}

/// Fallback handler: forward the request and stream the answer back.
pub async fn reverse_proxy(State(state): State<AppState>, req: Request) -> Response {
    match forward(&state, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(state: &AppState, req: Request) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    let registry = &state.config.registry;
    let base = if parts.uri.path().starts_with(CHART_API_PREFIX) {
        registry.chart_upstream()
    } else {
        registry.upstream_url.as_str()
    };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = join_url(base, path_and_query);

    let mut headers = forwardable(&parts.headers);
    if !headers.contains_key(header::USER_AGENT) {
        headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
    }

    let mut upstream = state
        .http
        .request(parts.method.clone(), &url)
        .headers(headers);
    if body.size_hint().exact() != Some(0) {
        upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let started = Instant::now();
    let upstream = upstream.send().await.map_err(|e| {
        metrics::UPSTREAM_ERRORS.inc();
        tracing::warn!(method = %parts.method, url = %url, error = %e, "upstream request failed");
        ApiError::Upstream(e.to_string())
    })?;
    metrics::UPSTREAM_DURATION.observe(started.elapsed().as_secs_f64());

    tracing::debug!(
        method = %parts.method,
        url = %url,
        status = upstream.status().as_u16(),
        "upstream responded"
    );

    let mut response = Response::builder().status(upstream.status());
    if let Some(out) = response.headers_mut() {
        *out = forwardable(upstream.headers());
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::Internal(format!("failed to build proxied response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_single_slash() {
        assert_eq!(
            join_url("http://registry:5000/", "/v2/proj/img/manifests/latest"),
            "http://registry:5000/v2/proj/img/manifests/latest"
        );
        assert_eq!(
            join_url("http://registry:5000", "v2/_catalog?n=10"),
            "http://registry:5000/v2/_catalog?n=10"
        );
    }

    #[test]
    fn test_hop_by_hop_headers_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));

        let out = forwardable(&headers);
        assert!(!out.contains_key(header::CONNECTION));
        assert!(!out.contains_key("keep-alive"));
        assert_eq!(out.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(out.get(header::HOST).unwrap(), "proxy.local");
    }
}
