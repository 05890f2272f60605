//! Bootstrap, catalog/principal provisioning, and secret rotation
//! scenarios.

use std::sync::Arc;

use trellis_catalog::{CatalogError, CatalogManager, EntityRef};
use trellis_core::entity::{
    CATALOG_ADMIN_ROLE_NAME, CLIENT_ID_PROPERTY, ROOT_PRINCIPAL_NAME, ROTATION_REQUIRED_PROPERTY,
    SERVICE_ADMIN_ROLE_NAME,
};
use trellis_core::{Entity, EntityId, EntitySubType, EntityType, Privilege};
use trellis_store::InMemoryStore;

async fn bootstrapped_manager() -> CatalogManager {
    let manager = CatalogManager::new(Arc::new(InMemoryStore::new()));
    manager.bootstrap().await.unwrap();
    manager
}

async fn catalog_entity(manager: &CatalogManager, name: &str) -> Entity {
    let id = manager.generate_new_entity_id().await.unwrap();
    Entity::new(
        EntityId::NULL,
        id,
        EntityType::Catalog,
        EntitySubType::Null,
        EntityId::ROOT,
        name,
    )
}

async fn principal_entity(manager: &CatalogManager, name: &str) -> Entity {
    let id = manager.generate_new_entity_id().await.unwrap();
    Entity::new(
        EntityId::NULL,
        id,
        EntityType::Principal,
        EntitySubType::Null,
        EntityId::ROOT,
        name,
    )
}

#[tokio::test]
async fn bootstrap_provisions_root_container_principal_and_admin_role() {
    let manager = bootstrapped_manager().await;

    let root = manager
        .load_entity(EntityId::NULL, EntityId::ROOT, EntityType::Root)
        .await
        .unwrap();
    let root_principal = manager
        .read_entity_by_name(None, EntityType::Principal, EntitySubType::Any, ROOT_PRINCIPAL_NAME)
        .await
        .unwrap();
    let service_admin = manager
        .read_entity_by_name(
            None,
            EntityType::PrincipalRole,
            EntitySubType::Any,
            SERVICE_ADMIN_ROLE_NAME,
        )
        .await
        .unwrap();

    // The root principal can use the service-admin role.
    let to_principal = manager
        .load_grants_to_grantee(root_principal.key())
        .await
        .unwrap();
    assert!(to_principal.grant_records.iter().any(|record| {
        record.privilege == Privilege::PrincipalRoleUsage
            && record.securable_id == service_admin.id
    }));

    // The service-admin role manages access on the root container.
    let to_role = manager
        .load_grants_to_grantee(service_admin.key())
        .await
        .unwrap();
    assert!(to_role.grant_records.iter().any(|record| {
        record.privilege == Privilege::ServiceManageAccess && record.securable_id == root.id
    }));

    // The root principal has credentials keyed by its recorded client id.
    let client_id = root_principal
        .internal_properties
        .get(CLIENT_ID_PROPERTY)
        .expect("client id recorded");
    manager.load_principal_secrets(client_id).await.unwrap();
}

#[tokio::test]
async fn bootstrap_is_idempotent() {
    let manager = bootstrapped_manager().await;
    let service_admin = manager
        .read_entity_by_name(
            None,
            EntityType::PrincipalRole,
            EntitySubType::Any,
            SERVICE_ADMIN_ROLE_NAME,
        )
        .await
        .unwrap();
    let grants_before = manager
        .load_grants_to_grantee(service_admin.key())
        .await
        .unwrap();

    manager.bootstrap().await.unwrap();

    let grants_after = manager
        .load_grants_to_grantee(service_admin.key())
        .await
        .unwrap();
    assert_eq!(
        grants_before.grant_records.len(),
        grants_after.grant_records.len(),
        "a second bootstrap adds nothing"
    );
}

#[tokio::test]
async fn create_catalog_provisions_admin_role_with_default_grants() {
    let manager = bootstrapped_manager().await;
    let output = manager
        .create_catalog(catalog_entity(&manager, "sales").await, &[])
        .await
        .unwrap();

    assert_eq!(output.admin_role.name, CATALOG_ADMIN_ROLE_NAME);
    assert_eq!(output.admin_role.catalog_id, output.catalog.id);

    let admin_grants = manager
        .load_grants_to_grantee(output.admin_role.key())
        .await
        .unwrap();
    let privileges: Vec<Privilege> = admin_grants
        .grant_records
        .iter()
        .map(|record| record.privilege)
        .collect();
    assert!(privileges.contains(&Privilege::CatalogManageAccess));
    assert!(privileges.contains(&Privilege::CatalogManageMetadata));

    // With no explicit principal roles, usage of the admin role goes to the
    // service-admin role.
    let service_admin = manager
        .read_entity_by_name(
            None,
            EntityType::PrincipalRole,
            EntitySubType::Any,
            SERVICE_ADMIN_ROLE_NAME,
        )
        .await
        .unwrap();
    let service_admin_grants = manager
        .load_grants_to_grantee(service_admin.key())
        .await
        .unwrap();
    assert!(service_admin_grants.grant_records.iter().any(|record| {
        record.privilege == Privilege::CatalogRoleUsage
            && record.securable_id == output.admin_role.id
    }));
}

#[tokio::test]
async fn create_catalog_grants_usage_to_explicit_principal_roles() {
    let manager = bootstrapped_manager().await;
    let role_id = manager.generate_new_entity_id().await.unwrap();
    let principal_role = manager
        .create_entity_if_not_exists(
            None,
            Entity::new(
                EntityId::NULL,
                role_id,
                EntityType::PrincipalRole,
                EntitySubType::Null,
                EntityId::ROOT,
                "data-engineers",
            ),
        )
        .await
        .unwrap();

    let output = manager
        .create_catalog(
            catalog_entity(&manager, "sales").await,
            &[EntityRef::from(&principal_role)],
        )
        .await
        .unwrap();

    let grants = manager
        .load_grants_to_grantee(principal_role.key())
        .await
        .unwrap();
    assert!(grants.grant_records.iter().any(|record| {
        record.privilege == Privilege::CatalogRoleUsage
            && record.securable_id == output.admin_role.id
    }));
}

#[tokio::test]
async fn create_catalog_twice_is_an_idempotent_retry() {
    let manager = bootstrapped_manager().await;
    let catalog = catalog_entity(&manager, "sales").await;

    let first = manager.create_catalog(catalog.clone(), &[]).await.unwrap();
    let second = manager.create_catalog(catalog, &[]).await.unwrap();

    assert_eq!(first.catalog.id, second.catalog.id);
    assert_eq!(first.admin_role.id, second.admin_role.id);

    // No second grant set was issued.
    let admin_grants = manager
        .load_grants_to_grantee(first.admin_role.key())
        .await
        .unwrap();
    assert_eq!(admin_grants.grant_records.len(), 2);
}

#[tokio::test]
async fn create_catalog_name_conflict_is_an_error() {
    let manager = bootstrapped_manager().await;
    manager
        .create_catalog(catalog_entity(&manager, "sales").await, &[])
        .await
        .unwrap();

    let err = manager
        .create_catalog(catalog_entity(&manager, "sales").await, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::EntityAlreadyExists { .. }));
}

#[tokio::test]
async fn create_principal_returns_plaintext_secret_exactly_once() {
    let manager = bootstrapped_manager().await;
    let principal = principal_entity(&manager, "etl-service").await;

    let first = manager.create_principal(principal.clone()).await.unwrap();
    assert!(first.secrets.main_secret.is_some());
    assert_eq!(
        first.principal.internal_properties.get(CLIENT_ID_PROPERTY),
        Some(&first.secrets.principal_client_id)
    );

    // The retry resolves the same credentials through the recorded client
    // id; the plaintext is gone.
    let retry = manager.create_principal(principal).await.unwrap();
    assert_eq!(
        retry.secrets.principal_client_id,
        first.secrets.principal_client_id
    );
    assert!(retry.secrets.main_secret.is_none());
}

#[tokio::test]
async fn create_principal_name_conflict_is_an_error() {
    let manager = bootstrapped_manager().await;
    manager
        .create_principal(principal_entity(&manager, "etl-service").await)
        .await
        .unwrap();

    let err = manager
        .create_principal(principal_entity(&manager, "etl-service").await)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::EntityAlreadyExists { .. }));
}

#[tokio::test]
async fn rotation_keeps_the_old_hash_as_secondary() {
    let manager = bootstrapped_manager().await;
    let created = manager
        .create_principal(principal_entity(&manager, "etl-service").await)
        .await
        .unwrap();
    let client_id = created.secrets.principal_client_id.clone();
    let old_hash = created.secrets.main_secret_hash.clone();

    let rotated = manager
        .rotate_principal_secrets(&client_id, created.principal.id, false, &old_hash)
        .await
        .unwrap();
    assert!(rotated.matches_hash(&old_hash));
    assert_ne!(rotated.main_secret_hash, old_hash);

    let principal = manager
        .load_entity(EntityId::NULL, created.principal.id, EntityType::Principal)
        .await
        .unwrap();
    assert!(
        !principal
            .internal_properties
            .contains_key(ROTATION_REQUIRED_PROPERTY),
        "a plain rotation never sets the marker"
    );
}

#[tokio::test]
async fn reset_sets_the_marker_and_the_next_rotation_clears_it() {
    let manager = bootstrapped_manager().await;
    let created = manager
        .create_principal(principal_entity(&manager, "etl-service").await)
        .await
        .unwrap();
    let client_id = created.secrets.principal_client_id.clone();
    let principal_id = created.principal.id;

    let reset = manager
        .rotate_principal_secrets(
            &client_id,
            principal_id,
            true,
            &created.secrets.main_secret_hash,
        )
        .await
        .unwrap();
    assert!(
        reset.secondary_secret_hash.is_none(),
        "a reset leaves no previous secret valid"
    );

    let principal = manager
        .load_entity(EntityId::NULL, principal_id, EntityType::Principal)
        .await
        .unwrap();
    assert!(principal
        .internal_properties
        .contains_key(ROTATION_REQUIRED_PROPERTY));
    let marked_version = principal.entity_version;

    // The marker forces the next non-reset rotation to behave as a reset,
    // and it is cleared afterwards.
    let rotated = manager
        .rotate_principal_secrets(&client_id, principal_id, false, &reset.main_secret_hash)
        .await
        .unwrap();
    assert!(rotated.secondary_secret_hash.is_none());

    let principal = manager
        .load_entity(EntityId::NULL, principal_id, EntityType::Principal)
        .await
        .unwrap();
    assert!(!principal
        .internal_properties
        .contains_key(ROTATION_REQUIRED_PROPERTY));
    assert_eq!(principal.entity_version, marked_version + 1);
}

#[tokio::test]
async fn rotating_a_dropped_principal_reports_not_found() {
    let manager = bootstrapped_manager().await;
    let created = manager
        .create_principal(principal_entity(&manager, "etl-service").await)
        .await
        .unwrap();
    let client_id = created.secrets.principal_client_id.clone();

    manager
        .drop_entity_if_exists(None, &EntityRef::from(&created.principal), None, false)
        .await
        .unwrap();

    let err = manager
        .rotate_principal_secrets(
            &client_id,
            created.principal.id,
            false,
            &created.secrets.main_secret_hash,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::EntityNotFound));

    // Dropping the principal discarded its secrets as well.
    let err = manager.load_principal_secrets(&client_id).await.unwrap_err();
    assert!(matches!(err, CatalogError::EntityNotFound));
}

#[tokio::test]
async fn missing_root_container_is_backfilled_on_resolved_read() {
    // A store that was never bootstrapped at all.
    let manager = CatalogManager::new(Arc::new(InMemoryStore::new()));

    let resolved = manager
        .load_resolved_entity_by_name(
            EntityId::NULL,
            EntityId::ROOT,
            EntityType::Root,
            "root",
        )
        .await
        .unwrap();
    let root = resolved.entity.expect("backfill recreated the root");
    assert_eq!(root.entity_type, EntityType::Root);

    // The repair committed on its own: a plain read sees it too.
    manager
        .load_entity(EntityId::NULL, EntityId::ROOT, EntityType::Root)
        .await
        .unwrap();
}

#[tokio::test]
async fn purge_deletes_everything() {
    let manager = bootstrapped_manager().await;
    manager
        .create_catalog(catalog_entity(&manager, "sales").await, &[])
        .await
        .unwrap();

    manager.purge().await.unwrap();

    let err = manager
        .load_entity(EntityId::NULL, EntityId::ROOT, EntityType::Root)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::EntityNotFound));
}
