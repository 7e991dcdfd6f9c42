//! Transactional quota charges and credits for one reference.

use crate::error::{QuotaError, QuotaResult};
use std::sync::Arc;
use tollgate_core::{ResourceErrors, ResourceList, covers_usage, is_safe};
use tollgate_metadata::models::Quota;
use tollgate_metadata::repos::QuotaRepo;
use tollgate_metadata::{MetadataError, MetadataStore};

/// Applies usage changes to the quota of `(reference, reference_id)`.
///
/// Every change runs as a read-modify-write under the store's row lock, so
/// concurrent managers for the same pair are serialized by the database.
#[derive(Clone)]
pub struct Manager {
    store: Arc<dyn MetadataStore>,
    reference: String,
    reference_id: String,
}

impl Manager {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        reference: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            reference: reference.into(),
            reference_id: reference_id.into(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    /// Create the quota and its usage row. `used` defaults to zero for every
    /// resource in `hard`.
    pub async fn new_quota(&self, hard: &ResourceList, used: Option<&ResourceList>) -> QuotaResult<i64> {
        let used = used.cloned().unwrap_or_else(|| hard.zero());
        let id = self
            .store
            .create_quota(&self.reference, &self.reference_id, hard, &used)
            .await?;
        tracing::info!(
            reference = %self.reference,
            reference_id = %self.reference_id,
            hard = %hard,
            "quota created"
        );
        Ok(id)
    }

    /// Create the quota with `hard` and zero usage unless it already exists.
    pub async fn ensure_quota(&self, hard: &ResourceList) -> QuotaResult<()> {
        if self
            .store
            .ensure_quota(&self.reference, &self.reference_id, hard)
            .await?
        {
            tracing::info!(
                reference = %self.reference,
                reference_id = %self.reference_id,
                hard = %hard,
                "quota created with default hard limits"
            );
        }
        Ok(())
    }

    pub async fn get_quota(&self) -> QuotaResult<Quota> {
        self.store
            .get_quota(&self.reference, &self.reference_id)
            .await?
            .ok_or_else(|| self.not_found())
    }

    /// Charge `delta`. Returns the committed usage.
    pub async fn add_resources(&self, delta: &ResourceList) -> QuotaResult<ResourceList> {
        let delta = delta.clone();
        self.update(move |used| used.add(&delta)).await
    }

    /// Credit `delta`. Returns the committed usage.
    pub async fn subtract_resources(&self, delta: &ResourceList) -> QuotaResult<ResourceList> {
        let delta = delta.clone();
        self.update(move |used| used.subtract(&delta)).await
    }

    /// Replace the hard limits. Limits below the committed usage are refused
    /// and leave the quota untouched. Returns the usage the check ran against.
    pub async fn update_hard_limits(&self, hard: &ResourceList) -> QuotaResult<ResourceList> {
        let next = hard.clone();
        let update = move |_: &ResourceList, used: &ResourceList| -> Result<ResourceList, ResourceErrors> {
            covers_usage(&next, used)?;
            Ok(next.clone())
        };

        match self
            .store
            .update_quota_hard(&self.reference, &self.reference_id, &update)
            .await
        {
            Ok(used) => {
                tracing::info!(
                    reference = %self.reference,
                    reference_id = %self.reference_id,
                    hard = %hard,
                    "quota hard limits updated"
                );
                Ok(used)
            }
            Err(MetadataError::Rejected(errors)) => Err(QuotaError::InvalidHardLimits(errors)),
            Err(MetadataError::NotFound(_)) => Err(self.not_found()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update<F>(&self, apply: F) -> QuotaResult<ResourceList>
    where
        F: Fn(&ResourceList) -> ResourceList + Send + Sync + 'static,
    {
        let update =
            move |hard: &ResourceList, used: &ResourceList| -> Result<ResourceList, ResourceErrors> {
                let next = apply(used);
                is_safe(hard, used, &next)?;
                Ok(next)
            };

        match self
            .store
            .update_quota_usage(&self.reference, &self.reference_id, &update)
            .await
        {
            Ok(used) => Ok(used),
            Err(MetadataError::Rejected(errors)) => {
                let err = QuotaError::Rejected(errors);
                tracing::debug!(
                    reference = %self.reference,
                    reference_id = %self.reference_id,
                    overflowed = ?err.overflowed(),
                    error = %err,
                    "quota update rejected"
                );
                Err(err)
            }
            Err(MetadataError::NotFound(_)) => Err(self.not_found()),
            Err(e) => Err(e.into()),
        }
    }

    fn not_found(&self) -> QuotaError {
        QuotaError::QuotaNotFound {
            reference: self.reference.clone(),
            reference_id: self.reference_id.clone(),
        }
    }
}
