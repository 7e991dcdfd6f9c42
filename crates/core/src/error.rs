//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    #[error("invalid resource list: {0}")]
    InvalidResourceList(String),

    #[error("invalid resource name: {0}")]
    InvalidResourceName(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unsupported manifest media type: {0}")]
    UnsupportedMediaType(String),

    #[error("invalid immutable rule: {0}")]
    InvalidRule(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
