//! Resolved-entity reads: entity plus grants, with incremental refresh.
//!
//! Access-control checks need an entity together with its grant records.
//! Callers cache both and refresh incrementally: the version-pair lookup
//! tells them whether content, grants, neither, or both moved since their
//! cached copy, and only the stale half is reloaded.

use trellis_core::entity::{ROOT_CONTAINER_NAME, SERVICE_ADMIN_ROLE_NAME};
use trellis_core::{Entity, EntityId, EntityKey, EntitySubType, EntityType, GrantRecord, Privilege};
use trellis_store::StoreTransaction;

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;
use crate::resolver::EntityRef;
use crate::results::ResolvedEntityOutput;

impl CatalogManager {
    /// Loads an entity and its full grant set by composite id.
    pub async fn load_resolved_entity_by_id(
        &self,
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
    ) -> CatalogResult<ResolvedEntityOutput> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            let Some(entity) = txn.lookup_entity(catalog_id, id, entity_type).await? else {
                return Err(CatalogError::EntityNotFound);
            };
            Self::resolved_output(txn.as_ref(), entity).await
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Loads an entity and its full grant set by name.
    ///
    /// When the well-known root container is missing, an idempotent repair
    /// transaction — with its own commit boundary, separate from this read
    /// — recreates it (and its service-admin grant, if the service-admin
    /// role exists) before the read is retried. The repair is scoped to
    /// exactly that one identity.
    pub async fn load_resolved_entity_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        name: &str,
    ) -> CatalogResult<ResolvedEntityOutput> {
        let first = self
            .load_resolved_entity_by_name_once(catalog_id, parent_id, entity_type, name)
            .await;

        let root_missing = matches!(first, Err(CatalogError::EntityNotFound))
            && entity_type == EntityType::Root
            && name == ROOT_CONTAINER_NAME;
        if !root_missing {
            return first;
        }

        self.backfill_root_container().await?;

        self.load_resolved_entity_by_name_once(catalog_id, parent_id, entity_type, name)
            .await
    }

    async fn load_resolved_entity_by_name_once(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        name: &str,
    ) -> CatalogResult<ResolvedEntityOutput> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            let Some(entity) = txn
                .lookup_entity_by_name(catalog_id, parent_id, entity_type, name)
                .await?
            else {
                return Err(CatalogError::EntityNotFound);
            };
            Self::resolved_output(txn.as_ref(), entity).await
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Recreates the root container in its own transaction.
    #[tracing::instrument(skip_all)]
    async fn backfill_root_container(&self) -> CatalogResult<()> {
        tracing::warn!("root container missing, backfilling");
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            let root = self
                .create_entity_if_not_exists_in_txn(
                    txn.as_mut(),
                    None,
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
            if let Some(service_admin) = txn
                .lookup_entity_by_name(
                    EntityId::NULL,
                    EntityId::ROOT,
                    EntityType::PrincipalRole,
                    SERVICE_ADMIN_ROLE_NAME,
                )
                .await?
            {
                self.persist_new_grant_record(
                    txn.as_mut(),
                    &EntityRef::from(&root),
                    &EntityRef::from(&service_admin),
                    Privilege::ServiceManageAccess,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Incrementally refreshes a cached resolved entity.
    ///
    /// Content is reloaded only when the stored `entity_version` differs
    /// from the caller's; grants only when the stored
    /// `grant_records_version` differs. An absent version row means the
    /// entity was purged.
    pub async fn refresh_resolved_entity(
        &self,
        entity_version: i32,
        grant_records_version: i32,
        entity_type: EntityType,
        catalog_id: EntityId,
        id: EntityId,
    ) -> CatalogResult<ResolvedEntityOutput> {
        let txn = self.store.begin_read().await?;
        let key = EntityKey::new(catalog_id, id);
        let outcome = async {
            let Some(versions) = txn
                .lookup_entity_versions(&[key])
                .await?
                .first()
                .copied()
                .flatten()
            else {
                return Err(CatalogError::EntityNotFound);
            };

            let entity = if versions.entity_version == entity_version {
                None
            } else {
                let Some(entity) = txn.lookup_entity(catalog_id, id, entity_type).await? else {
                    return Err(CatalogError::EntityNotFound);
                };
                Some(entity)
            };

            let grant_records = if versions.grant_records_version == grant_records_version {
                None
            } else {
                Some(Self::load_all_grants(txn.as_ref(), entity_type, key).await?)
            };

            Ok(ResolvedEntityOutput {
                entity,
                grants_version: versions.grant_records_version,
                grant_records,
            })
        }
        .await;
        self.finish(txn, outcome).await
    }

    async fn resolved_output(
        txn: &dyn StoreTransaction,
        entity: Entity,
    ) -> CatalogResult<ResolvedEntityOutput> {
        let grant_records =
            Self::load_all_grants(txn, entity.entity_type, entity.key()).await?;
        Ok(ResolvedEntityOutput {
            grants_version: entity.grant_records_version,
            entity: Some(entity),
            grant_records: Some(grant_records),
        })
    }

    /// Grantee kinds see both sides of their grants; everything else only
    /// the grants on it as a securable.
    async fn load_all_grants(
        txn: &dyn StoreTransaction,
        entity_type: EntityType,
        key: EntityKey,
    ) -> CatalogResult<Vec<GrantRecord>> {
        let mut grants = if entity_type.is_grantee() {
            txn.load_grants_on_grantee(key).await?
        } else {
            Vec::new()
        };
        grants.extend(txn.load_grants_on_securable(key).await?);
        Ok(grants)
    }
}
