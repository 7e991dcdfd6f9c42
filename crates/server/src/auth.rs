//! Request tracing and admin authentication middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and reduced to printable ASCII.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marker extension for requests carrying the admin token.
#[derive(Clone, Copy, Debug)]
pub struct AdminCaller;

fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            // RFC 6750: Authorization scheme is case-insensitive
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// SHA-256 hex of a bearer token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Attach a trace ID and run the request inside a span carrying it.
pub async fn trace_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    next.run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await
}

/// Reject admin API calls that do not present the configured admin token.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&req)
        .ok_or_else(|| ApiError::Unauthorized("admin token required".to_string()))?;

    let presented = hash_token(token);
    let expected = state.config.admin.token_hash.to_ascii_lowercase();
    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        tracing::warn!("admin request with invalid token");
        return Err(ApiError::Unauthorized("invalid admin token".to_string()));
    }

    req.extensions_mut().insert(AdminCaller);
    Ok(next.run(req).await)
}

/// Require that the admin middleware accepted this request.
pub fn require_admin(req: &Request) -> ApiResult<AdminCaller> {
    req.extensions()
        .get::<AdminCaller>()
        .copied()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}
