//! Entity lifecycle: creation, update, rename, drop, and the read side.

use std::collections::BTreeMap;

use trellis_core::entity::CLIENT_ID_PROPERTY;
use trellis_core::policy::{is_valid_policy_target, policy_kind_of};
use trellis_core::task::{TASK_DATA_PROPERTY, TASK_KIND_PROPERTY};
use trellis_core::{
    AsyncTaskKind, Entity, EntityId, EntityKey, EntitySubType, EntityType, Error,
};
use trellis_store::{EntityVersions, Page, PageToken, StoreTransaction};

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;
use crate::resolver::{resolve_path, resolve_path_with_entities, EntityRef};
use crate::results::{DropOutput, EntityWithPath};

impl CatalogManager {
    /// Allocates a fresh entity id from the persistence port.
    ///
    /// Callers assemble entities with store-allocated ids before handing
    /// them to a create operation.
    pub async fn generate_new_entity_id(&self) -> CatalogResult<EntityId> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async { Ok(txn.generate_id().await?) }.await;
        self.finish(txn, outcome).await
    }

    /// Creates an entity under the given path unless one already exists.
    ///
    /// Re-creating the same identity is an idempotent retry and returns the
    /// stored entity unchanged; a different entity holding the name fails
    /// with [`CatalogError::EntityAlreadyExists`].
    #[tracing::instrument(skip_all, fields(entity = %entity.key(), name = %entity.name))]
    pub async fn create_entity_if_not_exists(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entity: Entity,
    ) -> CatalogResult<Entity> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = self
            .create_entity_if_not_exists_in_txn(txn.as_mut(), catalog_path, entity)
            .await;
        self.finish(txn, outcome).await
    }

    /// Creates several entities in one transaction; the first failure rolls
    /// back everything already staged.
    pub async fn create_entities_if_not_exist(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entities: Vec<Entity>,
    ) -> CatalogResult<Vec<Entity>> {
        let mut txn = self.store.begin_read_write().await?;
        let mut created = Vec::with_capacity(entities.len());
        let mut outcome = Ok(());
        for entity in entities {
            match self
                .create_entity_if_not_exists_in_txn(txn.as_mut(), catalog_path, entity)
                .await
            {
                Ok(entity) => created.push(entity),
                Err(error) => {
                    outcome = Err(error);
                    break;
                }
            }
        }
        self.finish(txn, outcome.map(|()| created)).await
    }

    pub(crate) async fn create_entity_if_not_exists_in_txn(
        &self,
        txn: &mut dyn StoreTransaction,
        catalog_path: Option<&[EntityRef]>,
        entity: Entity,
    ) -> CatalogResult<Entity> {
        if let Some(found) = txn
            .lookup_entity(entity.catalog_id, entity.id, entity.entity_type)
            .await?
        {
            // Same identity already persisted: the client retried.
            return Ok(found);
        }

        Self::path_unresolved(resolve_path(txn, catalog_path).await?)?;

        if let Some(holder) = txn
            .lookup_entity_handle_by_name(
                entity.catalog_id,
                entity.parent_id,
                entity.entity_type,
                &entity.name,
            )
            .await?
        {
            return Err(CatalogError::EntityAlreadyExists {
                sub_type: holder.sub_type,
            });
        }

        self.persist_new_entity(txn, entity).await
    }

    /// Applies property changes to an entity unless its stored version has
    /// moved past the version the caller observed.
    ///
    /// Only `properties` and `internal_properties` are taken from the
    /// supplied entity; everything else comes from the stored snapshot.
    #[tracing::instrument(skip_all, fields(entity = %entity.key()))]
    pub async fn update_entity_properties_if_not_changed(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entity: &Entity,
    ) -> CatalogResult<Entity> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = self
            .update_entity_properties_in_txn(txn.as_mut(), catalog_path, entity)
            .await;
        self.finish(txn, outcome).await
    }

    /// Applies several property updates in one transaction; the first
    /// failure rolls back everything already staged.
    pub async fn update_entities_properties_if_not_changed(
        &self,
        updates: &[EntityWithPath],
    ) -> CatalogResult<Vec<Entity>> {
        let mut txn = self.store.begin_read_write().await?;
        let mut updated = Vec::with_capacity(updates.len());
        let mut outcome = Ok(());
        for update in updates {
            match self
                .update_entity_properties_in_txn(
                    txn.as_mut(),
                    update.catalog_path.as_deref(),
                    &update.entity,
                )
                .await
            {
                Ok(entity) => updated.push(entity),
                Err(error) => {
                    outcome = Err(error);
                    break;
                }
            }
        }
        self.finish(txn, outcome.map(|()| updated)).await
    }

    pub(crate) async fn update_entity_properties_in_txn(
        &self,
        txn: &mut dyn StoreTransaction,
        catalog_path: Option<&[EntityRef]>,
        entity: &Entity,
    ) -> CatalogResult<Entity> {
        let leaf = EntityRef::from(entity);
        Self::path_unresolved(
            resolve_path_with_entities(txn, catalog_path, Some(&leaf), &[]).await?,
        )?;

        let stored = txn
            .lookup_entity(entity.catalog_id, entity.id, entity.entity_type)
            .await?
            .ok_or_else(|| Error::invariant("resolved entity vanished within transaction"))?;

        if stored.entity_version != entity.entity_version {
            return Err(CatalogError::ConcurrentModification);
        }

        let updated = stored
            .to_builder()
            .properties(entity.properties.clone())
            .internal_properties(entity.internal_properties.clone())
            .build();
        self.persist_entity_after_change(txn, updated, false, &stored)
            .await
    }

    /// Renames an entity, optionally re-parenting it under a new path.
    ///
    /// `new_catalog_path == None` means the parent does not change. The
    /// supplied `renamed` entity carries the new name and properties plus
    /// the entity version the caller observed.
    #[tracing::instrument(skip_all, fields(entity = %entity_to_rename.key(), new_name = %renamed.name))]
    pub async fn rename_entity(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entity_to_rename: &EntityRef,
        new_catalog_path: Option<&[EntityRef]>,
        renamed: Entity,
    ) -> CatalogResult<Entity> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = self
            .rename_entity_in_txn(
                txn.as_mut(),
                catalog_path,
                entity_to_rename,
                new_catalog_path,
                renamed,
            )
            .await;
        self.finish(txn, outcome).await
    }

    async fn rename_entity_in_txn(
        &self,
        txn: &mut dyn StoreTransaction,
        catalog_path: Option<&[EntityRef]>,
        entity_to_rename: &EntityRef,
        new_catalog_path: Option<&[EntityRef]>,
        renamed: Entity,
    ) -> CatalogResult<Entity> {
        if new_catalog_path.is_some() && catalog_path.is_none() {
            return Err(
                Error::invariant("re-parenting requires the source path as well").into(),
            );
        }

        let resolved = Self::entity_unresolved(
            resolve_path_with_entities(txn, catalog_path, Some(entity_to_rename), &[]).await?,
        )?;

        let Some(stored) = txn
            .lookup_entity(
                entity_to_rename.catalog_id,
                entity_to_rename.id,
                entity_to_rename.entity_type,
            )
            .await?
        else {
            return Err(CatalogError::EntityNotFound);
        };

        if stored.entity_version != renamed.entity_version {
            return Err(CatalogError::ConcurrentModification);
        }

        if stored.cannot_be_dropped_or_renamed() {
            return Err(CatalogError::EntityCannotBeRenamed);
        }

        // Re-resolve the destination if the entity is moving.
        let destination = match new_catalog_path {
            Some(new_path) => {
                Self::path_unresolved(resolve_path(txn, Some(new_path)).await?)?
            }
            None => resolved,
        };

        if let Some(holder) = txn
            .lookup_entity_handle_by_name(
                destination.catalog_id_or_null(),
                destination.parent_id,
                stored.entity_type,
                &renamed.name,
            )
            .await?
        {
            return Err(CatalogError::EntityAlreadyExists {
                sub_type: holder.sub_type,
            });
        }

        let mut builder = stored
            .to_builder()
            .name(renamed.name.clone())
            .properties(renamed.properties.clone())
            .internal_properties(renamed.internal_properties.clone());
        if new_catalog_path.is_some() {
            builder = builder.parent_id(destination.parent_id);
        }

        self.persist_entity_after_change(txn, builder.build(), true, &stored)
            .await
    }

    /// Drops an entity if it exists, cascading grant and policy-mapping
    /// cleanup, and optionally scheduling an asynchronous cleanup task in
    /// the same transaction so the task is never lost relative to the drop.
    #[tracing::instrument(skip_all, fields(entity = %entity_to_drop.key(), cleanup = schedule_cleanup))]
    pub async fn drop_entity_if_exists(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entity_to_drop: &EntityRef,
        cleanup_properties: Option<BTreeMap<String, String>>,
        schedule_cleanup: bool,
    ) -> CatalogResult<DropOutput> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = self
            .drop_entity_in_txn(
                txn.as_mut(),
                catalog_path,
                entity_to_drop,
                cleanup_properties,
                schedule_cleanup,
            )
            .await;
        self.finish(txn, outcome).await
    }

    async fn drop_entity_in_txn(
        &self,
        txn: &mut dyn StoreTransaction,
        catalog_path: Option<&[EntityRef]>,
        entity_to_drop: &EntityRef,
        cleanup_properties: Option<BTreeMap<String, String>>,
        schedule_cleanup: bool,
    ) -> CatalogResult<DropOutput> {
        Self::path_unresolved(
            resolve_path_with_entities(txn, catalog_path, Some(entity_to_drop), &[]).await?,
        )?;

        let Some(stored) = txn
            .lookup_entity(
                entity_to_drop.catalog_id,
                entity_to_drop.id,
                entity_to_drop.entity_type,
            )
            .await?
        else {
            return Err(CatalogError::EntityNotFound);
        };

        if stored.cannot_be_dropped_or_renamed() {
            return Err(CatalogError::EntityUndroppable);
        }

        match stored.entity_type {
            EntityType::Catalog => {
                let catalog_id = stored.id;
                if txn
                    .has_children(Some(EntityType::Namespace), catalog_id, catalog_id)
                    .await?
                {
                    return Err(CatalogError::NamespaceNotEmpty);
                }

                // At most two catalog roles can block the drop; if only the
                // admin role remains, it is dropped along with the catalog.
                let catalog_roles = txn
                    .list_entities(
                        catalog_id,
                        catalog_id,
                        EntityType::CatalogRole,
                        &|_: &Entity| true,
                        &PageToken::from_limit(2),
                    )
                    .await?
                    .items;
                if catalog_roles.len() > 1 {
                    return Err(CatalogError::CatalogNotEmpty);
                }
                if let Some(last_role) = catalog_roles.into_iter().next() {
                    self.drop_entity_core(txn, &last_role).await?;
                }
            }
            EntityType::Namespace => {
                if txn
                    .has_children(None, stored.catalog_id, stored.id)
                    .await?
                {
                    return Err(CatalogError::NamespaceNotEmpty);
                }
            }
            EntityType::Policy if !schedule_cleanup => {
                if txn.supports_policy_mappings() {
                    let kind = policy_kind_of(&stored)
                        .ok_or_else(|| Error::invariant("policy entity has no kind"))?;
                    if !txn.load_targets_on_policy(stored.key(), kind).await?.is_empty() {
                        return Err(CatalogError::PolicyHasMappings);
                    }
                }
            }
            _ => {}
        }

        self.drop_entity_core(txn, &stored).await?;

        if schedule_cleanup && stored.entity_type != EntityType::Policy {
            let task_id = txn.generate_id().await?;
            let payload = serde_json::to_string(&stored).map_err(Error::serialization)?;
            let mut task = Entity::new(
                EntityId::NULL,
                task_id,
                EntityType::Task,
                EntitySubType::Null,
                EntityId::ROOT,
                format!("entity-cleanup-{}", stored.id),
            );
            task.properties.insert(
                TASK_KIND_PROPERTY.to_owned(),
                AsyncTaskKind::EntityCleanup.code().to_string(),
            );
            task.properties.insert(TASK_DATA_PROPERTY.to_owned(), payload);
            if let Some(cleanup_properties) = cleanup_properties {
                task.internal_properties = cleanup_properties;
            }
            let task = self
                .create_entity_if_not_exists_in_txn(txn, None, task)
                .await?;
            return Ok(DropOutput {
                cleanup_task_id: Some(task.id),
            });
        }

        Ok(DropOutput::default())
    }

    /// The actual drop: removes every grant record touching the entity and
    /// bumps the grant version of each distinct entity on the other side,
    /// best-effort-deletes policy mappings, soft-deletes the entity, and
    /// discards principal secrets.
    pub(crate) async fn drop_entity_core(
        &self,
        txn: &mut dyn StoreTransaction,
        entity: &Entity,
    ) -> CatalogResult<()> {
        if entity.is_dropped() {
            return Err(Error::invariant("entity already dropped").into());
        }

        let key = entity.key();
        let grants_on_grantee = if entity.entity_type.is_grantee() {
            txn.load_grants_on_grantee(key).await?
        } else {
            Vec::new()
        };
        let grants_on_securable = txn.load_grants_on_securable(key).await?;
        txn.delete_all_grant_records(entity, &grants_on_grantee, &grants_on_securable)
            .await?;

        // Every distinct entity on the other side of a removed grant gets
        // its grant version bumped exactly once, one conditional write at a
        // time.
        let mut other_side: Vec<EntityKey> = Vec::new();
        for record_key in grants_on_grantee
            .iter()
            .map(trellis_core::GrantRecord::securable_key)
            .chain(
                grants_on_securable
                    .iter()
                    .map(trellis_core::GrantRecord::grantee_key),
            )
        {
            if !other_side.contains(&record_key) {
                other_side.push(record_key);
            }
        }
        for original in txn.lookup_entities(&other_side).await?.into_iter().flatten() {
            let bumped =
                original.with_grant_records_version(original.grant_records_version + 1);
            txn.write_entity(&bumped, false, Some(&original)).await?;
        }

        let is_policy = entity.entity_type == EntityType::Policy;
        if (is_policy || is_valid_policy_target(entity.entity_type, entity.sub_type))
            && txn.supports_policy_mappings()
        {
            let mappings_on_policy = if is_policy {
                let kind = policy_kind_of(entity)
                    .ok_or_else(|| Error::invariant("policy entity has no kind"))?;
                txn.load_targets_on_policy(key, kind).await?
            } else {
                Vec::new()
            };
            let mappings_on_target = if is_policy {
                Vec::new()
            } else {
                txn.load_policies_on_target(key).await?
            };
            txn.delete_all_policy_mappings(entity, &mappings_on_target, &mappings_on_policy)
                .await?;
        }

        txn.delete_entity(entity).await?;

        if entity.entity_type == EntityType::Principal {
            let client_id = entity
                .internal_properties
                .get(CLIENT_ID_PROPERTY)
                .ok_or_else(|| Error::invariant("principal has no client id"))?;
            txn.delete_principal_secrets(client_id, entity.id).await?;
        }

        Ok(())
    }

    /// Reads an entity by name under a path, filtered by sub-type
    /// ([`EntitySubType::Any`] matches all).
    pub async fn read_entity_by_name(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entity_type: EntityType,
        sub_type: EntitySubType,
        name: &str,
    ) -> CatalogResult<Entity> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            let resolved = Self::path_unresolved(resolve_path(txn.as_ref(), catalog_path).await?)?;
            let entity = txn
                .lookup_entity_by_name(
                    resolved.catalog_id_or_null(),
                    resolved.parent_id,
                    entity_type,
                    name,
                )
                .await?
                .filter(|entity| sub_type.matches(entity.sub_type));
            entity.ok_or(CatalogError::EntityNotFound)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Pages through the active entities of one kind under a path, filtered
    /// by sub-type.
    pub async fn list_entities(
        &self,
        catalog_path: Option<&[EntityRef]>,
        entity_type: EntityType,
        sub_type: EntitySubType,
        page_token: &PageToken,
    ) -> CatalogResult<Page<Entity>> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            let resolved = Self::path_unresolved(resolve_path(txn.as_ref(), catalog_path).await?)?;
            let filter = move |entity: &Entity| sub_type.matches(entity.sub_type);
            Ok(txn
                .list_entities(
                    resolved.catalog_id_or_null(),
                    resolved.parent_id,
                    entity_type,
                    &filter,
                    page_token,
                )
                .await?)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Loads an entity directly by composite id.
    pub async fn load_entity(
        &self,
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
    ) -> CatalogResult<Entity> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            txn.lookup_entity(catalog_id, id, entity_type)
                .await?
                .ok_or(CatalogError::EntityNotFound)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Batch-loads the version pairs of entities for cache invalidation;
    /// entries are `None` for entities that are gone.
    pub async fn load_entities_change_tracking(
        &self,
        keys: &[EntityKey],
    ) -> CatalogResult<Vec<Option<EntityVersions>>> {
        let txn = self.store.begin_read().await?;
        let outcome = async { Ok(txn.lookup_entity_versions(keys).await?) }.await;
        self.finish(txn, outcome).await
    }
}
