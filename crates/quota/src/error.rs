//! Quota error types.

use thiserror::Error;
use tollgate_core::{ResourceErrors, ResourceName};
use tollgate_metadata::MetadataError;

/// Quota operation errors.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// The change would leave usage unsafe. Carries one entry per resource.
    #[error("quota rejected: {0}")]
    Rejected(ResourceErrors),

    #[error("quota not found for {reference}/{reference_id}")]
    QuotaNotFound {
        reference: String,
        reference_id: String,
    },

    #[error("invalid hard limits: {0}")]
    InvalidHardLimits(ResourceErrors),

    #[error("driver not found: {0}")]
    DriverNotFound(String),

    #[error("{driver} reference not found: {key}")]
    ReferenceNotFound { driver: String, key: String },

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl QuotaError {
    /// True when at least one resource would exceed its hard limit.
    pub fn is_overflow(&self) -> bool {
        matches!(self, QuotaError::Rejected(errors) if errors.has_overflow())
    }

    /// Resources that overflowed, if any.
    pub fn overflowed(&self) -> Vec<ResourceName> {
        match self {
            QuotaError::Rejected(errors) => errors
                .iter()
                .filter_map(|e| match e {
                    tollgate_core::ResourceError::Overflow { resource, .. } => Some(*resource),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Result type for quota operations.
pub type QuotaResult<T> = std::result::Result<T, QuotaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::ResourceError;

    #[test]
    fn test_is_overflow() {
        let overflow = QuotaError::Rejected(ResourceErrors::from(ResourceError::Overflow {
            resource: ResourceName::Storage,
            hard: 1000,
            current: 950,
            attempted: 1150,
        }));
        assert!(overflow.is_overflow());
        assert_eq!(overflow.overflowed(), vec![ResourceName::Storage]);

        let missing = QuotaError::Rejected(ResourceErrors::from(ResourceError::NotFound(
            ResourceName::Count,
        )));
        assert!(!missing.is_overflow());
        assert!(missing.overflowed().is_empty());
    }
}
