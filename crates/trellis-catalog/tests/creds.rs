//! Sub-scoped credential vending scenarios.

use std::sync::Arc;

use trellis_catalog::{CatalogError, CatalogManager};
use trellis_core::entity::STORAGE_CONFIG_PROPERTY;
use trellis_core::{Entity, EntityId, EntitySubType, EntityType};
use trellis_store::InMemoryStore;

async fn bootstrapped_manager() -> CatalogManager {
    let manager = CatalogManager::new(Arc::new(InMemoryStore::new()));
    manager.bootstrap().await.unwrap();
    manager
}

async fn catalog_with_storage(manager: &CatalogManager, name: &str) -> Entity {
    let id = manager.generate_new_entity_id().await.unwrap();
    let catalog = Entity::new(
        EntityId::NULL,
        id,
        EntityType::Catalog,
        EntitySubType::Null,
        EntityId::ROOT,
        name,
    )
    .to_builder()
    .internal_property(
        STORAGE_CONFIG_PROPERTY,
        r#"{"bucket":"warehouse","region":"us-east1"}"#,
    )
    .build();
    manager.create_catalog(catalog, &[]).await.unwrap().catalog
}

#[tokio::test]
async fn creds_are_scoped_to_the_requested_locations() {
    let manager = bootstrapped_manager().await;
    let catalog = catalog_with_storage(&manager, "sales").await;

    let access = manager
        .get_subscoped_creds_for_entity(
            EntityId::NULL,
            catalog.id,
            EntityType::Catalog,
            true,
            &["s3://warehouse/raw".to_owned()],
            &["s3://warehouse/curated".to_owned()],
        )
        .await
        .unwrap();

    assert_eq!(
        access.credentials.get("read-locations").map(String::as_str),
        Some("s3://warehouse/raw")
    );
    assert_eq!(
        access.credentials.get("write-locations").map(String::as_str),
        Some("s3://warehouse/curated")
    );
}

#[tokio::test]
async fn at_least_one_location_is_required() {
    let manager = bootstrapped_manager().await;
    let catalog = catalog_with_storage(&manager, "sales").await;

    let err = manager
        .get_subscoped_creds_for_entity(
            EntityId::NULL,
            catalog.id,
            EntityType::Catalog,
            false,
            &[],
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Core(trellis_core::Error::Invariant { .. })
    ));
}

#[tokio::test]
async fn vending_for_a_missing_entity_reports_not_found() {
    let manager = bootstrapped_manager().await;

    let err = manager
        .get_subscoped_creds_for_entity(
            EntityId::NULL,
            EntityId::new(4242),
            EntityType::Catalog,
            false,
            &["s3://warehouse/raw".to_owned()],
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::EntityNotFound));
}
