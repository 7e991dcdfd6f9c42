//! Immutable rule repository trait.

use crate::error::MetadataResult;
use async_trait::async_trait;
use tollgate_core::ImmutableRule;

/// Repository for immutable tag rules.
#[async_trait]
pub trait ImmutableRuleRepo: Send + Sync {
    /// Store a rule for `rule.project_id`. Returns the new rule id.
    async fn create_immutable_rule(&self, rule: &ImmutableRule) -> MetadataResult<i64>;

    /// Rules for a project ordered by priority then id, including disabled ones.
    async fn list_immutable_rules(&self, project_id: i64) -> MetadataResult<Vec<ImmutableRule>>;

    /// Returns `true` when a rule was removed.
    async fn delete_immutable_rule(&self, project_id: i64, rule_id: i64) -> MetadataResult<bool>;
}
