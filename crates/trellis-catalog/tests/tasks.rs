//! Task queue scenarios: atomic drop+schedule and lease-based claiming.

use std::sync::Arc;
use std::time::Duration;

use trellis_catalog::{CatalogConfig, CatalogError, CatalogManager, EntityRef, TaskQueueConfig};
use trellis_core::task::{
    ATTEMPT_COUNT_PROPERTY, LAST_ATTEMPT_EXECUTOR_PROPERTY, TASK_DATA_PROPERTY, TASK_KIND_PROPERTY,
};
use trellis_core::{AsyncTaskKind, Entity, EntityId, EntitySubType, EntityType};
use trellis_store::{InMemoryStore, PageToken};

async fn bootstrapped_manager_with_config(config: CatalogConfig) -> (Arc<InMemoryStore>, CatalogManager) {
    let store = Arc::new(InMemoryStore::new());
    let manager = CatalogManager::with_config(store.clone(), config);
    manager.bootstrap().await.unwrap();
    (store, manager)
}

async fn bootstrapped_manager() -> (Arc<InMemoryStore>, CatalogManager) {
    bootstrapped_manager_with_config(CatalogConfig::default()).await
}

async fn new_catalog(manager: &CatalogManager, name: &str) -> Entity {
    let id = manager.generate_new_entity_id().await.unwrap();
    let catalog = Entity::new(
        EntityId::NULL,
        id,
        EntityType::Catalog,
        EntitySubType::Null,
        EntityId::ROOT,
        name,
    );
    manager.create_catalog(catalog, &[]).await.unwrap().catalog
}

async fn new_namespace(manager: &CatalogManager, catalog: &Entity, name: &str) -> Entity {
    let id = manager.generate_new_entity_id().await.unwrap();
    let namespace = Entity::new(
        catalog.id,
        id,
        EntityType::Namespace,
        EntitySubType::Null,
        catalog.id,
        name,
    );
    manager
        .create_entity_if_not_exists(Some(&[EntityRef::from(catalog)]), namespace)
        .await
        .unwrap()
}

#[tokio::test]
async fn drop_with_cleanup_schedules_a_task_in_the_same_transaction() {
    let (_store, manager) = bootstrapped_manager().await;
    let catalog = new_catalog(&manager, "sales").await;
    let namespace = new_namespace(&manager, &catalog, "q1").await;

    let mut cleanup_properties = std::collections::BTreeMap::new();
    cleanup_properties.insert("purge-files".to_owned(), "true".to_owned());
    let output = manager
        .drop_entity_if_exists(
            Some(&[EntityRef::from(&catalog)]),
            &EntityRef::from(&namespace),
            Some(cleanup_properties),
            true,
        )
        .await
        .unwrap();
    let task_id = output.cleanup_task_id.expect("cleanup was requested");

    let task = manager
        .load_entity(EntityId::NULL, task_id, EntityType::Task)
        .await
        .unwrap();
    assert_eq!(
        task.properties.get(TASK_KIND_PROPERTY).map(String::as_str),
        Some(AsyncTaskKind::EntityCleanup.code().to_string().as_str())
    );
    assert_eq!(
        task.internal_properties.get("purge-files").map(String::as_str),
        Some("true")
    );

    // The payload is the dropped entity itself.
    let payload: Entity =
        serde_json::from_str(task.properties.get(TASK_DATA_PROPERTY).unwrap()).unwrap();
    assert_eq!(payload.id, namespace.id);
    assert_eq!(payload.name, namespace.name);
}

#[tokio::test]
async fn failed_drop_commits_neither_the_drop_nor_the_task() {
    let (store, manager) = bootstrapped_manager().await;

    // A principal created through the raw entity path carries no client id,
    // which the drop treats as a structural invariant violation — after it
    // has already staged grant cleanup and the delete itself.
    let id = manager.generate_new_entity_id().await.unwrap();
    let broken = manager
        .create_entity_if_not_exists(
            None,
            Entity::new(
                EntityId::NULL,
                id,
                EntityType::Principal,
                EntitySubType::Null,
                EntityId::ROOT,
                "no-client-id",
            ),
        )
        .await
        .unwrap();
    let active_before = store.active_entity_count().unwrap();

    let err = manager
        .drop_entity_if_exists(None, &EntityRef::from(&broken), None, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Core(trellis_core::Error::Invariant { .. })
    ));

    // Nothing was committed: the principal is still active and no task
    // entity appeared.
    assert_eq!(store.active_entity_count().unwrap(), active_before);
    manager
        .load_entity(EntityId::NULL, broken.id, EntityType::Principal)
        .await
        .unwrap();
}

#[tokio::test]
async fn leasing_stamps_executor_and_attempt_fields() {
    let (_store, manager) = bootstrapped_manager().await;
    let catalog = new_catalog(&manager, "sales").await;
    let namespace = new_namespace(&manager, &catalog, "q1").await;
    manager
        .drop_entity_if_exists(
            Some(&[EntityRef::from(&catalog)]),
            &EntityRef::from(&namespace),
            None,
            true,
        )
        .await
        .unwrap();

    let leased = manager
        .load_tasks("executor-a", &PageToken::read_everything())
        .await
        .unwrap();
    assert_eq!(leased.items.len(), 1);
    let task = &leased.items[0];
    assert_eq!(
        task.properties
            .get(LAST_ATTEMPT_EXECUTOR_PROPERTY)
            .map(String::as_str),
        Some("executor-a")
    );
    assert_eq!(
        task.properties.get(ATTEMPT_COUNT_PROPERTY).map(String::as_str),
        Some("1")
    );
    assert_eq!(task.entity_version, 2, "the lease is a versioned update");
}

#[tokio::test]
async fn a_fresh_lease_blocks_other_executors() {
    let (_store, manager) = bootstrapped_manager().await;
    let catalog = new_catalog(&manager, "sales").await;
    for name in ["q1", "q2"] {
        let namespace = new_namespace(&manager, &catalog, name).await;
        manager
            .drop_entity_if_exists(
                Some(&[EntityRef::from(&catalog)]),
                &EntityRef::from(&namespace),
                None,
                true,
            )
            .await
            .unwrap();
    }

    let first = manager
        .load_tasks("executor-a", &PageToken::read_everything())
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);

    let second = manager
        .load_tasks("executor-b", &PageToken::read_everything())
        .await
        .unwrap();
    assert!(
        second.items.is_empty(),
        "fresh leases are invisible to other executors"
    );
}

#[tokio::test]
async fn expired_leases_are_reclaimed_with_a_higher_attempt_count() {
    let config = CatalogConfig {
        task_queue: TaskQueueConfig {
            lease_timeout: Duration::ZERO,
        },
    };
    let (_store, manager) = bootstrapped_manager_with_config(config).await;
    let catalog = new_catalog(&manager, "sales").await;
    let namespace = new_namespace(&manager, &catalog, "q1").await;
    manager
        .drop_entity_if_exists(
            Some(&[EntityRef::from(&catalog)]),
            &EntityRef::from(&namespace),
            None,
            true,
        )
        .await
        .unwrap();

    manager
        .load_tasks("executor-a", &PageToken::read_everything())
        .await
        .unwrap();

    // With a zero lease timeout every lease is immediately stale.
    let reclaimed = manager
        .load_tasks("executor-b", &PageToken::read_everything())
        .await
        .unwrap();
    assert_eq!(reclaimed.items.len(), 1);
    let task = &reclaimed.items[0];
    assert_eq!(
        task.properties
            .get(LAST_ATTEMPT_EXECUTOR_PROPERTY)
            .map(String::as_str),
        Some("executor-b")
    );
    assert_eq!(
        task.properties.get(ATTEMPT_COUNT_PROPERTY).map(String::as_str),
        Some("2")
    );
}

#[tokio::test]
async fn policy_drops_never_schedule_cleanup_tasks() {
    let (store, manager) = bootstrapped_manager().await;
    let catalog = new_catalog(&manager, "sales").await;

    let policy_id = manager.generate_new_entity_id().await.unwrap();
    let policy = manager
        .create_entity_if_not_exists(
            Some(&[EntityRef::from(&catalog)]),
            Entity::new(
                catalog.id,
                policy_id,
                EntityType::Policy,
                EntitySubType::Null,
                catalog.id,
                "expire-snapshots",
            )
            .to_builder()
            .internal_property(
                trellis_core::policy::POLICY_KIND_PROPERTY,
                trellis_core::PolicyKind::SnapshotExpiry.code().to_string(),
            )
            .build(),
        )
        .await
        .unwrap();

    let active_before = store.active_entity_count().unwrap();
    let output = manager
        .drop_entity_if_exists(
            Some(&[EntityRef::from(&catalog)]),
            &EntityRef::from(&policy),
            None,
            true,
        )
        .await
        .unwrap();
    assert!(output.cleanup_task_id.is_none());
    assert_eq!(
        store.active_entity_count().unwrap(),
        active_before - 1,
        "the policy is gone and no task entity was created"
    );
}
