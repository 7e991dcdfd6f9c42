//! Rule matcher against a SQLite metadata store.

use std::collections::HashMap;
use std::sync::Arc;
use tollgate_core::immutable::SCOPE_REPOSITORY;
use tollgate_core::{Decoration, ImmutableRule, Selector};
use tollgate_metadata::repos::{ImmutableRuleRepo, ProjectRepo};
use tollgate_metadata::{MetadataStore, SqliteStore};
use tollgate_policy::{Candidate, ImmutableMatcher, RuleMatcher, SelectorRegistry};

async fn store() -> (Arc<dyn MetadataStore>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = SqliteStore::new(temp_dir.path().join("policy.db"), None)
        .await
        .expect("Failed to open SQLite store");
    (Arc::new(store), temp_dir)
}

fn release_rule(project_id: i64) -> ImmutableRule {
    ImmutableRule {
        id: 0,
        project_id,
        disabled: false,
        priority: 0,
        tag_selectors: vec![Selector::doublestar(Decoration::Matches, "release-*")],
        scope_selectors: HashMap::from([(
            SCOPE_REPOSITORY.to_string(),
            vec![Selector::doublestar(Decoration::Matches, "**")],
        )]),
    }
}

#[tokio::test]
async fn test_rules_are_project_scoped() {
    let (store, _dir) = store().await;
    let proj = store
        .create_project("proj", None)
        .await
        .unwrap();
    let other = store
        .create_project("other", None)
        .await
        .unwrap();
    store
        .create_immutable_rule(&release_rule(proj.project_id))
        .await
        .unwrap();

    let matcher = RuleMatcher::new(store.clone(), SelectorRegistry::default());
    let candidate = Candidate::new("img", "release-1.0");

    assert!(matcher.is_immutable(proj.project_id, &candidate).await.unwrap());
    assert!(!matcher.is_immutable(other.project_id, &candidate).await.unwrap());
    assert!(
        !matcher
            .is_immutable(proj.project_id, &Candidate::new("img", "latest"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_deleted_rule_stops_matching() {
    let (store, _dir) = store().await;
    let proj = store
        .create_project("proj", None)
        .await
        .unwrap();
    let rule_id = store
        .create_immutable_rule(&release_rule(proj.project_id))
        .await
        .unwrap();

    let matcher = RuleMatcher::new(store.clone(), SelectorRegistry::default());
    let candidate = Candidate::new("img", "release-1.0");
    assert!(matcher.is_immutable(proj.project_id, &candidate).await.unwrap());

    assert!(
        store
            .delete_immutable_rule(proj.project_id, rule_id)
            .await
            .unwrap()
    );
    assert!(!matcher.is_immutable(proj.project_id, &candidate).await.unwrap());
}
