//! Metadata store error types.

use thiserror::Error;
use tollgate_core::ResourceErrors;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A transactional update was refused by its callback and rolled back.
    #[error("update rejected: {0}")]
    Rejected(ResourceErrors),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

impl From<tollgate_core::Error> for MetadataError {
    fn from(e: tollgate_core::Error) -> Self {
        MetadataError::InvalidData(e.to_string())
    }
}

/// Map unique-constraint violations to `AlreadyExists`.
pub(crate) fn map_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            MetadataError::AlreadyExists(what())
        }
        _ => MetadataError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::{ResourceError, ResourceName};

    #[test]
    fn test_rejected_preserves_every_member() {
        let mut errors = ResourceErrors::new();
        errors.push(ResourceError::NotFound(ResourceName::Count));
        errors.push(ResourceError::Overflow {
            resource: ResourceName::Storage,
            hard: 10,
            current: 5,
            attempted: 20,
        });
        let msg = MetadataError::Rejected(errors).to_string();
        assert!(msg.starts_with("update rejected:"));
        assert!(msg.contains("count"));
        assert!(msg.contains("attempted 20"));
    }
}
