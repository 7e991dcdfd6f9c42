//! Immutability rule evaluation.

use crate::error::PolicyResult;
use crate::selector::{Candidate, Field, SelectorRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use tollgate_core::ImmutableRule;
use tollgate_metadata::MetadataStore;
use tollgate_metadata::repos::ImmutableRuleRepo;

/// Decides whether a `(repository, tag)` is immutable in a project.
#[async_trait]
pub trait ImmutableMatcher: Send + Sync {
    async fn is_immutable(&self, project_id: i64, candidate: &Candidate) -> PolicyResult<bool>;
}

/// Evaluate `rules` against `candidate`.
///
/// Disabled rules are ignored. The remaining ones are visited in priority
/// order; the first whose repository and tag selectors both keep the
/// candidate decides. A rule without repository selectors applies to every
/// repository.
pub fn match_rules(
    registry: &SelectorRegistry,
    rules: &[ImmutableRule],
    candidate: &Candidate,
) -> PolicyResult<Option<i64>> {
    let mut enabled: Vec<&ImmutableRule> = rules.iter().filter(|r| !r.disabled).collect();
    enabled.sort_by_key(|r| (r.priority, r.id));

    for rule in enabled {
        let survivors = registry.select(
            rule.repository_selectors(),
            Field::Repository,
            vec![candidate.clone()],
        )?;
        if survivors.is_empty() {
            continue;
        }

        let survivors = registry.select(&rule.tag_selectors, Field::Tag, survivors)?;
        if !survivors.is_empty() {
            return Ok(Some(rule.id));
        }
    }
    Ok(None)
}

/// Matcher reading rules from the metadata store.
#[derive(Clone)]
pub struct RuleMatcher {
    store: Arc<dyn MetadataStore>,
    selectors: SelectorRegistry,
}

impl RuleMatcher {
    pub fn new(store: Arc<dyn MetadataStore>, selectors: SelectorRegistry) -> Self {
        Self { store, selectors }
    }
}

#[async_trait]
impl ImmutableMatcher for RuleMatcher {
    async fn is_immutable(&self, project_id: i64, candidate: &Candidate) -> PolicyResult<bool> {
        let rules = self.store.list_immutable_rules(project_id).await?;
        let matched = match_rules(&self.selectors, &rules, candidate)?;
        if let Some(rule_id) = matched {
            tracing::debug!(
                project_id,
                rule_id,
                repository = %candidate.repository,
                tag = %candidate.tag,
                "immutable rule matched"
            );
        }
        Ok(matched.is_some())
    }
}
