//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use tollgate_core::{ImmutableRule, ResourceList};

// =============================================================================
// Quotas
// =============================================================================

/// Raw quota row joined with its usage row. Resource lists are stored as JSON.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaRow {
    pub id: i64,
    pub reference: String,
    pub reference_id: String,
    pub hard: String,
    pub used: String,
    pub creation_time: OffsetDateTime,
    pub update_time: OffsetDateTime,
}

/// Quota and usage for one (reference, reference_id) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Quota {
    pub id: i64,
    pub reference: String,
    pub reference_id: String,
    pub hard: ResourceList,
    pub used: ResourceList,
    pub creation_time: OffsetDateTime,
    pub update_time: OffsetDateTime,
}

impl TryFrom<QuotaRow> for Quota {
    type Error = crate::MetadataError;

    fn try_from(row: QuotaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            hard: ResourceList::from_json(&row.hard)?,
            used: ResourceList::from_json(&row.used)?,
            reference: row.reference,
            reference_id: row.reference_id,
            creation_time: row.creation_time,
            update_time: row.update_time,
        })
    }
}

// =============================================================================
// Projects
// =============================================================================

/// Project record. The project name is the first path segment of its repositories.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProjectRow {
    pub project_id: i64,
    pub name: String,
    pub owner_name: Option<String>,
    pub creation_time: OffsetDateTime,
}

// =============================================================================
// Artifacts and blobs
// =============================================================================

/// A tagged (or digest-only) manifest in a repository.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ArtifactRow {
    pub id: i64,
    pub project_id: i64,
    pub repository: String,
    /// Tag, or the digest itself for pushes by digest.
    pub tag: String,
    pub digest: String,
    pub kind: String,
    pub creation_time: OffsetDateTime,
    pub push_time: OffsetDateTime,
}

/// Values for inserting or re-pointing an artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub project_id: i64,
    pub repository: String,
    pub tag: String,
    pub digest: String,
    pub kind: String,
}

/// Content-addressed blob, shared across projects.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BlobRow {
    pub id: i64,
    pub digest: String,
    pub content_type: String,
    pub size: i64,
    pub creation_time: OffsetDateTime,
}

// =============================================================================
// Charts
// =============================================================================

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChartVersionRow {
    pub project_id: i64,
    pub chart_name: String,
    pub version: String,
    pub creation_time: OffsetDateTime,
}

// =============================================================================
// Immutable rules
// =============================================================================

/// Stored rule. Selectors live in `rule_json`.
#[derive(Debug, Clone, FromRow)]
pub struct ImmutableRuleRow {
    pub id: i64,
    pub project_id: i64,
    pub disabled: bool,
    pub priority: i32,
    pub rule_json: String,
}

impl TryFrom<ImmutableRuleRow> for ImmutableRule {
    type Error = crate::MetadataError;

    fn try_from(row: ImmutableRuleRow) -> Result<Self, Self::Error> {
        let mut rule: ImmutableRule = serde_json::from_str(&row.rule_json)
            .map_err(|e| crate::MetadataError::InvalidData(format!("immutable rule {}: {e}", row.id)))?;
        rule.id = row.id;
        rule.project_id = row.project_id;
        rule.disabled = row.disabled;
        rule.priority = row.priority;
        Ok(rule)
    }
}

/// Serialise a rule for the `rule_json` column.
pub(crate) fn rule_json(rule: &ImmutableRule) -> crate::MetadataResult<String> {
    serde_json::to_string(rule).map_err(|e| crate::MetadataError::Internal(e.to_string()))
}
