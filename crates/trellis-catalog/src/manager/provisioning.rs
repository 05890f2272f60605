//! Bootstrap and catalog provisioning.
//!
//! Creation of principals and catalogs follows a retry-idempotency pattern:
//! if the same identity is already persisted, the call is treated as a
//! client retry and returns the stored state — including, for principals,
//! the secrets looked up through the client id recorded in internal
//! properties. A missing client id or secret record on that path is a
//! structural invariant violation, not a normal outcome.

use trellis_core::entity::{
    CATALOG_ADMIN_ROLE_NAME, CLIENT_ID_PROPERTY, ROOT_CONTAINER_NAME, ROOT_PRINCIPAL_NAME,
    ROTATION_REQUIRED_PROPERTY, SERVICE_ADMIN_ROLE_NAME, STORAGE_CONFIG_PROPERTY,
    STORAGE_INTEGRATION_ID_PROPERTY,
};
use trellis_core::{
    Entity, EntityId, EntitySubType, EntityType, Error, PrincipalSecrets, Privilege,
};
use trellis_store::StoreTransaction;

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;
use crate::resolver::EntityRef;
use crate::results::{CreateCatalogOutput, CreatePrincipalOutput};

impl CatalogManager {
    /// Bootstraps the service: the root container, the root principal, the
    /// service-admin principal role, and their default grants, all in one
    /// transaction. Re-running against a bootstrapped store is a no-op.
    #[tracing::instrument(skip_all)]
    pub async fn bootstrap(&self) -> CatalogResult<()> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = self.bootstrap_in_txn(txn.as_mut()).await;
        self.finish(txn, outcome).await
    }

    async fn bootstrap_in_txn(&self, txn: &mut dyn StoreTransaction) -> CatalogResult<()> {
        if txn
            .lookup_entity(EntityId::NULL, EntityId::ROOT, EntityType::Root)
            .await?
            .is_some()
        {
            tracing::debug!("service already bootstrapped");
            return Ok(());
        }

        // The root container is the securable for all service-level grants.
        let root_container = self
            .persist_new_entity(
                txn,
                Entity::new(
                    EntityId::NULL,
                    EntityId::ROOT,
                    EntityType::Root,
                    EntitySubType::Null,
                    EntityId::ROOT,
                    ROOT_CONTAINER_NAME,
                ),
            )
            .await?;

        let root_principal_id = txn.generate_id().await?;
        let root_principal = self
            .create_principal_in_txn(
                txn,
                Entity::new(
                    EntityId::NULL,
                    root_principal_id,
                    EntityType::Principal,
                    EntitySubType::Null,
                    EntityId::ROOT,
                    ROOT_PRINCIPAL_NAME,
                ),
            )
            .await?
            .principal;

        let service_admin_id = txn.generate_id().await?;
        let service_admin = self
            .persist_new_entity(
                txn,
                Entity::new(
                    EntityId::NULL,
                    service_admin_id,
                    EntityType::PrincipalRole,
                    EntitySubType::Null,
                    EntityId::ROOT,
                    SERVICE_ADMIN_ROLE_NAME,
                ),
            )
            .await?;

        self.persist_new_grant_record(
            txn,
            &EntityRef::from(&service_admin),
            &EntityRef::from(&root_principal),
            Privilege::PrincipalRoleUsage,
        )
        .await?;

        self.persist_new_grant_record(
            txn,
            &EntityRef::from(&root_container),
            &EntityRef::from(&service_admin),
            Privilege::ServiceManageAccess,
        )
        .await?;

        tracing::info!("service bootstrapped");
        Ok(())
    }

    /// Deletes all metadata. Service decommissioning only.
    pub async fn purge(&self) -> CatalogResult<()> {
        let mut txn = self.store.begin_read_write().await?;
        tracing::warn!("deleting all metadata in the store");
        let outcome = async { Ok(txn.delete_all().await?) }.await;
        let result = self.finish(txn, outcome).await;
        if result.is_ok() {
            tracing::warn!("finished deleting all metadata");
        }
        result
    }

    /// Creates a principal with freshly generated credentials.
    ///
    /// Re-creating the same identity is an idempotent retry and returns the
    /// stored principal with its existing secrets; a different principal
    /// holding the name fails with [`CatalogError::EntityAlreadyExists`].
    #[tracing::instrument(skip_all, fields(principal = %principal.name))]
    pub async fn create_principal(
        &self,
        principal: Entity,
    ) -> CatalogResult<CreatePrincipalOutput> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = self.create_principal_in_txn(txn.as_mut(), principal).await;
        self.finish(txn, outcome).await
    }

    pub(crate) async fn create_principal_in_txn(
        &self,
        txn: &mut dyn StoreTransaction,
        principal: Entity,
    ) -> CatalogResult<CreatePrincipalOutput> {
        if principal.entity_type != EntityType::Principal {
            return Err(Error::invariant("entity is not a principal").into());
        }

        if let Some(existing) = txn
            .lookup_entity(principal.catalog_id, principal.id, EntityType::Principal)
            .await?
        {
            // Client retry: the stored principal must already carry its
            // client id, and that client id must still resolve to secrets.
            let client_id = existing
                .internal_properties
                .get(CLIENT_ID_PROPERTY)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Error::invariant("principal has no client id"))?;
            let secrets = txn
                .load_principal_secrets(client_id)
                .await?
                .ok_or_else(|| {
                    Error::invariant(format!("no secrets stored for client id {client_id}"))
                })?;
            return Ok(CreatePrincipalOutput {
                principal: existing,
                secrets,
            });
        }

        if let Some(holder) = txn
            .lookup_entity_handle_by_name(
                EntityId::NULL,
                EntityId::ROOT,
                EntityType::Principal,
                &principal.name,
            )
            .await?
        {
            return Err(CatalogError::EntityAlreadyExists {
                sub_type: holder.sub_type,
            });
        }

        let secrets = txn.generate_principal_secrets(principal.id).await?;
        let principal = principal
            .to_builder()
            .internal_property(CLIENT_ID_PROPERTY, secrets.principal_client_id.clone())
            .build();
        let principal = self.persist_new_entity(txn, principal).await?;

        Ok(CreatePrincipalOutput { principal, secrets })
    }

    /// Creates a catalog together with its admin role and default grants.
    ///
    /// The admin role receives `CatalogManageAccess` and
    /// `CatalogManageMetadata` on the catalog, and usage of the admin role
    /// is granted to each supplied principal role — or to the service-admin
    /// role when none are supplied. Re-creating the same identity is an
    /// idempotent retry.
    #[tracing::instrument(skip_all, fields(catalog = %catalog.name))]
    pub async fn create_catalog(
        &self,
        catalog: Entity,
        principal_roles: &[EntityRef],
    ) -> CatalogResult<CreateCatalogOutput> {
        if catalog.entity_type != EntityType::Catalog {
            return Err(Error::invariant("entity is not a catalog").into());
        }

        // A storage integration is provisioned from the serialized storage
        // configuration before the transaction opens: integration creation
        // may call an external service and must not hold the write path.
        let storage_config = catalog.internal_properties.get(STORAGE_CONFIG_PROPERTY);
        let already_integrated = catalog
            .internal_properties
            .contains_key(STORAGE_INTEGRATION_ID_PROPERTY);
        let integration = match storage_config {
            Some(config) if !already_integrated => Some(
                self.store
                    .create_storage_integration(catalog.key(), config)
                    .await?,
            ),
            _ => None,
        };

        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            if let Some(existing) = txn
                .lookup_entity(catalog.catalog_id, catalog.id, EntityType::Catalog)
                .await?
            {
                // Client retry: the admin role was provisioned with the
                // catalog and must still exist.
                let admin_role = txn
                    .lookup_entity_by_name(
                        existing.id,
                        existing.id,
                        EntityType::CatalogRole,
                        CATALOG_ADMIN_ROLE_NAME,
                    )
                    .await?
                    .ok_or_else(|| Error::invariant("catalog admin role not found"))?;
                return Ok(CreateCatalogOutput {
                    catalog: existing,
                    admin_role,
                });
            }

            if let Some(holder) = txn
                .lookup_entity_handle_by_name(
                    EntityId::NULL,
                    EntityId::ROOT,
                    EntityType::Catalog,
                    &catalog.name,
                )
                .await?
            {
                return Err(CatalogError::EntityAlreadyExists {
                    sub_type: holder.sub_type,
                });
            }

            txn.persist_storage_integration_if_needed(&catalog, integration.as_ref())
                .await?;

            let catalog = self.persist_new_entity(txn.as_mut(), catalog).await?;

            let admin_role_id = txn.generate_id().await?;
            let admin_role = self
                .persist_new_entity(
                    txn.as_mut(),
                    Entity::new(
                        catalog.id,
                        admin_role_id,
                        EntityType::CatalogRole,
                        EntitySubType::Null,
                        catalog.id,
                        CATALOG_ADMIN_ROLE_NAME,
                    ),
                )
                .await?;

            let catalog_ref = EntityRef::from(&catalog);
            let admin_ref = EntityRef::from(&admin_role);
            self.persist_new_grant_record(
                txn.as_mut(),
                &catalog_ref,
                &admin_ref,
                Privilege::CatalogManageAccess,
            )
            .await?;
            self.persist_new_grant_record(
                txn.as_mut(),
                &catalog_ref,
                &admin_ref,
                Privilege::CatalogManageMetadata,
            )
            .await?;

            if principal_roles.is_empty() {
                let service_admin = txn
                    .lookup_entity_by_name(
                        EntityId::NULL,
                        EntityId::ROOT,
                        EntityType::PrincipalRole,
                        SERVICE_ADMIN_ROLE_NAME,
                    )
                    .await?
                    .ok_or_else(|| Error::invariant("service admin role not found"))?;
                self.persist_new_grant_record(
                    txn.as_mut(),
                    &admin_ref,
                    &EntityRef::from(&service_admin),
                    Privilege::CatalogRoleUsage,
                )
                .await?;
            } else {
                for principal_role in principal_roles {
                    if principal_role.entity_type != EntityType::PrincipalRole {
                        return Err(Error::invariant("grantee is not a principal role").into());
                    }
                    self.persist_new_grant_record(
                        txn.as_mut(),
                        &admin_ref,
                        principal_role,
                        Privilege::CatalogRoleUsage,
                    )
                    .await?;
                }
            }

            // Reload the catalog so the returned entity carries the grant
            // version bumps applied above.
            let catalog = txn
                .lookup_entity(catalog.catalog_id, catalog.id, EntityType::Catalog)
                .await?
                .ok_or_else(|| Error::invariant("created catalog vanished"))?;
            let admin_role = txn
                .lookup_entity(admin_role.catalog_id, admin_role.id, EntityType::CatalogRole)
                .await?
                .ok_or_else(|| Error::invariant("created admin role vanished"))?;
            Ok(CreateCatalogOutput {
                catalog,
                admin_role,
            })
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Loads the credentials stored for a client id.
    pub async fn load_principal_secrets(
        &self,
        client_id: &str,
    ) -> CatalogResult<PrincipalSecrets> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            txn.load_principal_secrets(client_id)
                .await?
                .ok_or(CatalogError::EntityNotFound)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Rotates a principal's credentials.
    ///
    /// The rotation itself is delegated to the persistence port with a
    /// derived reset flag: a reset happens when explicitly requested or
    /// when the principal carries the rotation-required marker. The marker
    /// is set on an explicit reset and cleared otherwise, each through a
    /// version-bumping conditional write.
    #[tracing::instrument(skip_all, fields(principal = %principal_id, reset))]
    pub async fn rotate_principal_secrets(
        &self,
        client_id: &str,
        principal_id: EntityId,
        reset: bool,
        old_secret_hash: &str,
    ) -> CatalogResult<PrincipalSecrets> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            let Some(principal) = txn
                .lookup_entity(EntityId::NULL, principal_id, EntityType::Principal)
                .await?
            else {
                // The principal was dropped since the caller authenticated.
                return Err(CatalogError::EntityNotFound);
            };

            let marker_set = principal
                .internal_properties
                .contains_key(ROTATION_REQUIRED_PROPERTY);
            let do_reset = reset || marker_set;
            let secrets = txn
                .rotate_principal_secrets(client_id, principal_id, do_reset, old_secret_hash)
                .await?
                .ok_or(CatalogError::EntityNotFound)?;

            if reset && !marker_set {
                let mut internal = principal.internal_properties.clone();
                internal.insert(ROTATION_REQUIRED_PROPERTY.to_owned(), "true".to_owned());
                let updated = principal.to_builder().internal_properties(internal).build();
                self.persist_entity_after_change(txn.as_mut(), updated, false, &principal)
                    .await?;
            } else if !reset && marker_set {
                let mut internal = principal.internal_properties.clone();
                internal.remove(ROTATION_REQUIRED_PROPERTY);
                let updated = principal.to_builder().internal_properties(internal).build();
                self.persist_entity_after_change(txn.as_mut(), updated, false, &principal)
                    .await?;
            }

            Ok(secrets)
        }
        .await;
        self.finish(txn, outcome).await
    }
}
