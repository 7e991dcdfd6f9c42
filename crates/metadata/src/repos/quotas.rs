//! Quota repository trait.

use crate::error::MetadataResult;
use crate::models::Quota;
use async_trait::async_trait;
use tollgate_core::{ResourceErrors, ResourceList};

/// Computes the next usage from `(hard, used)`, or refuses the update.
pub type UsageUpdate =
    dyn Fn(&ResourceList, &ResourceList) -> Result<ResourceList, ResourceErrors> + Send + Sync;

/// Computes the next hard limits from `(hard, used)`, or refuses the update.
pub type HardUpdate = UsageUpdate;

/// Repository for quota and quota usage records.
#[async_trait]
pub trait QuotaRepo: Send + Sync {
    /// Insert the quota and its usage row in one transaction.
    ///
    /// Returns the new quota id, or `AlreadyExists` when the pair is taken.
    async fn create_quota(
        &self,
        reference: &str,
        reference_id: &str,
        hard: &ResourceList,
        used: &ResourceList,
    ) -> MetadataResult<i64>;

    /// Create the quota with zero usage if the pair has none yet.
    ///
    /// Returns `true` when a record was created.
    async fn ensure_quota(
        &self,
        reference: &str,
        reference_id: &str,
        hard: &ResourceList,
    ) -> MetadataResult<bool>;

    async fn get_quota(&self, reference: &str, reference_id: &str)
    -> MetadataResult<Option<Quota>>;

    /// Read-modify-write of the hard limits under the same row lock as usage
    /// updates.
    ///
    /// Returns the usage the new limits were checked against. An error from
    /// `update` is returned as `MetadataError::Rejected`.
    async fn update_quota_hard(
        &self,
        reference: &str,
        reference_id: &str,
        update: &HardUpdate,
    ) -> MetadataResult<ResourceList>;

    /// Read-modify-write of the usage row under a row lock.
    ///
    /// `update` sees the current hard limits and usage. Its result is written
    /// back in the same transaction. An error from `update` rolls back and is
    /// returned as `MetadataError::Rejected`.
    async fn update_quota_usage(
        &self,
        reference: &str,
        reference_id: &str,
        update: &UsageUpdate,
    ) -> MetadataResult<ResourceList>;
}
