//! Policy error types.

use thiserror::Error;
use tollgate_core::Decoration;
use tollgate_metadata::MetadataError;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no selector registered for kind {kind} with decoration {decoration}")]
    UnknownSelector { kind: String, decoration: Decoration },

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
