//! Quota manager and project driver behaviour against real stores.

mod common;

use common::run_quota_test_both;
use std::sync::Arc;
use tollgate_core::{ResourceError, ResourceList, ResourceName, UNLIMITED};
use tollgate_metadata::MetadataStore;
use tollgate_metadata::repos::ProjectRepo;
use tollgate_quota::{Driver, Manager, ProjectDriver, QuotaError};

fn storage(n: i64) -> ResourceList {
    ResourceList::new().with(ResourceName::Storage, n)
}

fn count(n: i64) -> ResourceList {
    ResourceList::new().with(ResourceName::Count, n)
}

#[tokio::test]
async fn test_new_quota_defaults_usage_to_zero() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store, "project", "1");
        let hard = count(10).with(ResourceName::Storage, UNLIMITED);
        manager.new_quota(&hard, None).await.unwrap();

        let quota = manager.get_quota().await.unwrap();
        assert_eq!(quota.hard, hard);
        assert_eq!(quota.used, count(0).with(ResourceName::Storage, 0));

        assert!(matches!(
            manager.new_quota(&hard, None).await,
            Err(QuotaError::Metadata(_))
        ));
    })
    .await;
}

#[tokio::test]
async fn test_usage_is_sum_of_committed_changes() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store, "project", "2");
        manager.new_quota(&storage(1000), None).await.unwrap();

        manager.add_resources(&storage(300)).await.unwrap();
        manager.add_resources(&storage(500)).await.unwrap();
        manager.subtract_resources(&storage(200)).await.unwrap();
        let used = manager.add_resources(&storage(100)).await.unwrap();

        assert_eq!(used, storage(700));
        assert_eq!(manager.get_quota().await.unwrap().used, storage(700));
    })
    .await;
}

#[tokio::test]
async fn test_overflow_rolls_back() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store, "project", "3");
        manager
            .new_quota(&storage(1000), Some(&storage(950)))
            .await
            .unwrap();

        let err = manager.add_resources(&storage(200)).await.unwrap_err();
        assert!(err.is_overflow());
        match err {
            QuotaError::Rejected(errors) => {
                assert_eq!(
                    errors.iter().collect::<Vec<_>>(),
                    vec![&ResourceError::Overflow {
                        resource: ResourceName::Storage,
                        hard: 1000,
                        current: 950,
                        attempted: 1150,
                    }]
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(manager.get_quota().await.unwrap().used, storage(950));
    })
    .await;
}

#[tokio::test]
async fn test_undeclared_resource_is_rejected() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store, "project", "4");
        manager.new_quota(&storage(1000), None).await.unwrap();

        let err = manager.add_resources(&count(1)).await.unwrap_err();
        assert!(!err.is_overflow());
        assert!(matches!(err, QuotaError::Rejected(_)));
    })
    .await;
}

#[tokio::test]
async fn test_missing_quota() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store, "project", "404");
        assert!(matches!(
            manager.add_resources(&count(1)).await,
            Err(QuotaError::QuotaNotFound { .. })
        ));
    })
    .await;
}

#[tokio::test]
async fn test_update_hard_limits_checks_usage() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store.clone(), "project", "5");
        manager
            .new_quota(&count(10).with(ResourceName::Storage, 1000), None)
            .await
            .unwrap();
        manager
            .add_resources(&count(4).with(ResourceName::Storage, 600))
            .await
            .unwrap();

        let err = manager
            .update_hard_limits(&count(3).with(ResourceName::Storage, UNLIMITED))
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::InvalidHardLimits(_)));
        assert_eq!(
            manager.get_quota().await.unwrap().hard,
            count(10).with(ResourceName::Storage, 1000)
        );

        let lowered = count(4).with(ResourceName::Storage, 600);
        let used = manager.update_hard_limits(&lowered).await.unwrap();
        assert_eq!(used, count(4).with(ResourceName::Storage, 600));
        assert_eq!(manager.get_quota().await.unwrap().hard, lowered);

        assert!(matches!(
            Manager::new(store, "project", "404")
                .update_hard_limits(&lowered)
                .await,
            Err(QuotaError::QuotaNotFound { .. })
        ));
    })
    .await;
}

#[tokio::test]
async fn test_ensure_quota_keeps_existing() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store.clone(), "project", "5");
        manager.ensure_quota(&count(5)).await.unwrap();
        manager.add_resources(&count(2)).await.unwrap();
        manager.ensure_quota(&count(50)).await.unwrap();

        let quota = manager.get_quota().await.unwrap();
        assert_eq!(quota.hard, count(5));
        assert_eq!(quota.used, count(2));
    })
    .await;
}

#[tokio::test]
async fn test_concurrent_adds_commit_exactly_floor() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let manager = Manager::new(store, "project", "race");
        manager.new_quota(&storage(1000), None).await.unwrap();

        let tasks = (0..20).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.add_resources(&storage(100)).await })
        });
        let results = futures::future::join_all(tasks).await;

        let mut committed = 0;
        let mut overflowed = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => committed += 1,
                Err(e) if e.is_overflow() => overflowed += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(committed, 10);
        assert_eq!(overflowed, 10);
        assert_eq!(manager.get_quota().await.unwrap().used, storage(1000));
    })
    .await;
}

#[tokio::test]
async fn test_project_driver_load() {
    run_quota_test_both(|store: Arc<dyn MetadataStore>| async move {
        let defaults = count(UNLIMITED).with(ResourceName::Storage, UNLIMITED);
        let driver = ProjectDriver::new(store.clone(), defaults);
        let project = store
            .create_project("library", Some("alice"))
            .await
            .unwrap();

        let object = driver.load(&project.project_id.to_string()).await.unwrap();
        assert_eq!(object["name"], "library");
        assert_eq!(object["owner_name"], "alice");
        assert_eq!(object["id"], project.project_id);

        assert!(matches!(
            driver.load("9999").await,
            Err(QuotaError::ReferenceNotFound { .. })
        ));
        assert!(matches!(
            driver.load("not-a-number").await,
            Err(QuotaError::ReferenceNotFound { .. })
        ));
    })
    .await;
}
