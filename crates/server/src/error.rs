//! API error types.
//!
//! Errors are rendered in the distribution error envelope
//! `{"errors":[{"code":…,"message":…,"detail":…}]}` so registry clients can
//! display them.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tollgate_kv::KvError;
use tollgate_metadata::MetadataError;
use tollgate_policy::PolicyError;
use tollgate_quota::QuotaError;

/// One entry of the error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorDescriptor {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Error envelope body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDescriptor>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("denied: {0}")]
    Denied(String),

    #[error("the configured policy prevents modifying {repository}:{tag}")]
    Immutable { repository: String, tag: String },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("repository name not known to registry: {0}")]
    NameUnknown(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("lock error: {0}")]
    Lock(#[from] KvError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("{0}")]
    Core(#[from] tollgate_core::Error),
}

impl ApiError {
    /// Error code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Denied(_) => "DENIED",
            Self::Immutable { .. } => "PROJECT_POLICY_VIOLATION",
            Self::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            Self::NameUnknown(_) => "NAME_UNKNOWN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DigestInvalid(_) => "DIGEST_INVALID",
            Self::ManifestInvalid(_) => "MANIFEST_INVALID",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::Lock(_) | Self::Internal(_) | Self::Policy(_) => "INTERNAL",
            Self::Quota(e) => match e {
                QuotaError::Rejected(errors) if errors.has_overflow() => "DENIED",
                QuotaError::InvalidHardLimits(_) => "BAD_REQUEST",
                QuotaError::ReferenceNotFound { .. } => "NAME_UNKNOWN",
                _ => "INTERNAL",
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => "NOT_FOUND",
                MetadataError::AlreadyExists(_) => "CONFLICT",
                _ => "INTERNAL",
            },
            Self::Core(e) => match e {
                tollgate_core::Error::InvalidDigest(_) => "DIGEST_INVALID",
                tollgate_core::Error::InvalidManifest(_) => "MANIFEST_INVALID",
                tollgate_core::Error::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
                tollgate_core::Error::InvalidRepository(_) => "NAME_INVALID",
                _ => "BAD_REQUEST",
            },
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Denied(_) => StatusCode::FORBIDDEN,
            Self::Immutable { .. } => StatusCode::PRECONDITION_FAILED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NameUnknown(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DigestInvalid(_) | Self::ManifestInvalid(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Lock(_) | Self::Internal(_) | Self::Policy(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Quota(e) => match e {
                QuotaError::Rejected(errors) if errors.has_overflow() => StatusCode::FORBIDDEN,
                QuotaError::InvalidHardLimits(_) => StatusCode::BAD_REQUEST,
                QuotaError::ReferenceNotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) => match e {
                tollgate_core::Error::UnsupportedMediaType(_) => {
                    StatusCode::UNSUPPORTED_MEDIA_TYPE
                }
                tollgate_core::Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn detail(&self) -> Option<serde_json::Value> {
        let errors = match self {
            Self::Quota(QuotaError::Rejected(errors) | QuotaError::InvalidHardLimits(errors)) => {
                errors
            }
            Self::Immutable { repository, tag } => {
                return Some(serde_json::json!({ "repository": repository, "tag": tag }));
            }
            _ => return None,
        };
        Some(serde_json::Value::Array(
            errors
                .iter()
                .map(|e| serde_json::Value::String(e.to_string()))
                .collect(),
        ))
    }

    /// True for quota rejections caused by an exceeded hard limit.
    pub fn is_overflow(&self) -> bool {
        match self {
            Self::Quota(e) => e.is_overflow(),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        let body = ErrorResponse {
            errors: vec![ErrorDescriptor {
                code: self.code().to_string(),
                message: self.to_string(),
                detail: self.detail(),
            }],
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::{ResourceError, ResourceErrors, ResourceName};

    fn overflow() -> ResourceErrors {
        ResourceErrors::from(ResourceError::Overflow {
            resource: ResourceName::Storage,
            hard: 1000,
            current: 950,
            attempted: 1150,
        })
    }

    #[test]
    fn test_overflow_maps_to_denied() {
        let err = ApiError::Quota(QuotaError::Rejected(overflow()));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "DENIED");
        assert!(err.is_overflow());
    }

    #[test]
    fn test_non_overflow_rejection_is_internal() {
        let errors = ResourceErrors::from(ResourceError::NotFound(ResourceName::Count));
        let err = ApiError::Quota(QuotaError::Rejected(errors));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_overflow());
    }

    #[test]
    fn test_immutable_maps_to_412() {
        let err = ApiError::Immutable {
            repository: "img".to_string(),
            tag: "release-1.0".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(err.code(), "PROJECT_POLICY_VIOLATION");
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = ApiError::Quota(QuotaError::Rejected(overflow())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errors"][0]["code"], "DENIED");
        assert!(
            body["errors"][0]["message"]
                .as_str()
                .unwrap()
                .contains("storage")
        );
        assert_eq!(body["errors"][0]["detail"].as_array().unwrap().len(), 1);
    }
}
