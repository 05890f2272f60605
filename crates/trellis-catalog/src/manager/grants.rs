//! Grant and privilege bookkeeping.
//!
//! Adding or removing a grant record bumps the `grant_records_version` of
//! exactly the two endpoints involved, through read-then-conditional-write
//! on each. The record and the two bumps are not atomic as a unit — only
//! each individual write is — which is safe because consumers treat a stale
//! version as "must reload", never as a correctness violation.

use trellis_core::{Entity, EntityKey, EntityType, Error, GrantRecord, Privilege};
use trellis_store::StoreTransaction;

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;
use crate::resolver::{resolve_path_with_entities, EntityRef};
use crate::results::LoadGrantsOutput;

impl CatalogManager {
    /// Grants usage on a role to a grantee.
    ///
    /// The privilege is implied by the grantee kind: a principal role
    /// receiving usage on a catalog role gets `CatalogRoleUsage`; a
    /// principal receiving usage on a principal role gets
    /// `PrincipalRoleUsage`. `catalog` must be supplied exactly when `role`
    /// is a catalog role.
    #[tracing::instrument(skip_all, fields(role = %role.key(), grantee = %grantee.key()))]
    pub async fn grant_usage_on_role_to_grantee(
        &self,
        catalog: Option<&EntityRef>,
        role: &EntityRef,
        grantee: &EntityRef,
    ) -> CatalogResult<GrantRecord> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            Self::resolve_role_usage(txn.as_ref(), catalog, role, grantee).await?;
            let privilege = Self::usage_privilege_for(grantee);
            self.persist_new_grant_record(txn.as_mut(), role, grantee, privilege)
                .await
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Revokes a previously granted role usage.
    ///
    /// Revoking an absent grant is a non-fatal no-op reported as
    /// [`CatalogError::GrantNotFound`].
    #[tracing::instrument(skip_all, fields(role = %role.key(), grantee = %grantee.key()))]
    pub async fn revoke_usage_on_role_from_grantee(
        &self,
        catalog: Option<&EntityRef>,
        role: &EntityRef,
        grantee: &EntityRef,
    ) -> CatalogResult<GrantRecord> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            Self::resolve_role_usage(txn.as_ref(), catalog, role, grantee).await?;
            let privilege = Self::usage_privilege_for(grantee);
            let Some(record) = txn
                .lookup_grant_record(role.key(), grantee.key(), privilege)
                .await?
            else {
                return Err(CatalogError::GrantNotFound);
            };
            self.revoke_grant_record(txn.as_mut(), role, grantee, &record)
                .await?;
            Ok(record)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Grants a privilege on a securable to a role.
    #[tracing::instrument(skip_all, fields(securable = %securable.key(), grantee = %grantee.key(), privilege = %privilege))]
    pub async fn grant_privilege_on_securable_to_role(
        &self,
        grantee: &EntityRef,
        catalog_path: Option<&[EntityRef]>,
        securable: &EntityRef,
        privilege: Privilege,
    ) -> CatalogResult<GrantRecord> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            Self::resolve_securable_grant(txn.as_ref(), grantee, catalog_path, securable).await?;
            self.persist_new_grant_record(txn.as_mut(), securable, grantee, privilege)
                .await
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Revokes a privilege on a securable from a role.
    #[tracing::instrument(skip_all, fields(securable = %securable.key(), grantee = %grantee.key(), privilege = %privilege))]
    pub async fn revoke_privilege_on_securable_from_role(
        &self,
        grantee: &EntityRef,
        catalog_path: Option<&[EntityRef]>,
        securable: &EntityRef,
        privilege: Privilege,
    ) -> CatalogResult<GrantRecord> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            Self::resolve_securable_grant(txn.as_ref(), grantee, catalog_path, securable).await?;
            let Some(record) = txn
                .lookup_grant_record(securable.key(), grantee.key(), privilege)
                .await?
            else {
                return Err(CatalogError::GrantNotFound);
            };
            self.revoke_grant_record(txn.as_mut(), securable, grantee, &record)
                .await?;
            Ok(record)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Loads every grant on a securable, the securable's current grants
    /// version, and the distinct grantee entities.
    pub async fn load_grants_on_securable(
        &self,
        securable: EntityKey,
    ) -> CatalogResult<LoadGrantsOutput> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            let grants_version = Self::lookup_grants_version(txn.as_ref(), securable).await?;
            let records = txn.load_grants_on_securable(securable).await?;
            let entities =
                Self::dereference_endpoints(txn.as_ref(), &records, GrantRecord::grantee_key)
                    .await?;
            Ok(LoadGrantsOutput {
                grants_version,
                grant_records: records,
                entities,
            })
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Loads every grant to a grantee, the grantee's current grants
    /// version, and the distinct securable entities.
    pub async fn load_grants_to_grantee(
        &self,
        grantee: EntityKey,
    ) -> CatalogResult<LoadGrantsOutput> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            let grants_version = Self::lookup_grants_version(txn.as_ref(), grantee).await?;
            let records = txn.load_grants_on_grantee(grantee).await?;
            let entities =
                Self::dereference_endpoints(txn.as_ref(), &records, GrantRecord::securable_key)
                    .await?;
            Ok(LoadGrantsOutput {
                grants_version,
                grant_records: records,
                entities,
            })
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// A live entity always has a grants version of at least 1; an absent
    /// version row means the entity is gone.
    async fn lookup_grants_version(
        txn: &dyn StoreTransaction,
        key: EntityKey,
    ) -> CatalogResult<i32> {
        let versions = txn.lookup_entity_versions(&[key]).await?;
        versions
            .first()
            .copied()
            .flatten()
            .map(|v| v.grant_records_version)
            .ok_or(CatalogError::EntityNotFound)
    }

    /// Resolves the distinct entities on one side of a set of grant
    /// records, skipping any that no longer exist (grant and entity
    /// deletion are not atomic with each other).
    async fn dereference_endpoints(
        txn: &dyn StoreTransaction,
        records: &[GrantRecord],
        side: impl Fn(&GrantRecord) -> EntityKey,
    ) -> CatalogResult<Vec<Entity>> {
        let mut keys: Vec<EntityKey> = Vec::new();
        for key in records.iter().map(side) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(txn
            .lookup_entities(&keys)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    const fn usage_privilege_for(grantee: &EntityRef) -> Privilege {
        if matches!(grantee.entity_type, EntityType::PrincipalRole) {
            Privilege::CatalogRoleUsage
        } else {
            Privilege::PrincipalRoleUsage
        }
    }

    /// Validates and re-resolves the entities of a role-usage grant: the
    /// role must be a catalog or principal role, the catalog argument must
    /// be supplied exactly for catalog roles, and role and grantee must
    /// still exist.
    async fn resolve_role_usage(
        txn: &dyn StoreTransaction,
        catalog: Option<&EntityRef>,
        role: &EntityRef,
        grantee: &EntityRef,
    ) -> CatalogResult<()> {
        if !grantee.entity_type.is_grantee() {
            return Err(Error::invariant("grantee kind cannot receive grants").into());
        }
        let is_catalog_role = role.entity_type == EntityType::CatalogRole;
        let is_principal_role = role.entity_type == EntityType::PrincipalRole;
        if !is_catalog_role && !is_principal_role {
            return Err(Error::invariant("role must be a catalog or principal role").into());
        }
        if is_catalog_role != catalog.is_some() {
            return Err(Error::invariant(
                "a catalog must be supplied exactly when the role is a catalog role",
            )
            .into());
        }

        let catalog_path: Option<Vec<EntityRef>> = catalog.map(|c| vec![c.clone()]);
        let top_level = [role.clone(), grantee.clone()];
        Self::entity_unresolved(
            resolve_path_with_entities(txn, catalog_path.as_deref(), None, &top_level).await?,
        )
        .map(|_| ())
    }

    /// Validates and re-resolves the entities of a securable grant: the
    /// grantee must be grant-capable and a catalog path must accompany any
    /// catalog-scoped securable.
    async fn resolve_securable_grant(
        txn: &dyn StoreTransaction,
        grantee: &EntityRef,
        catalog_path: Option<&[EntityRef]>,
        securable: &EntityRef,
    ) -> CatalogResult<()> {
        if !grantee.entity_type.is_grantee() {
            return Err(Error::invariant("grantee kind cannot receive grants").into());
        }
        if securable.catalog_id != trellis_core::EntityId::NULL && catalog_path.is_none() {
            return Err(Error::invariant(
                "a catalog path is required for catalog-scoped securables",
            )
            .into());
        }
        let top_level = [grantee.clone()];
        Self::entity_unresolved(
            resolve_path_with_entities(txn, catalog_path, Some(securable), &top_level).await?,
        )
        .map(|_| ())
    }

    /// Creates and persists a new grant record, bumping the grants version
    /// of both endpoints by exactly one.
    pub(crate) async fn persist_new_grant_record(
        &self,
        txn: &mut dyn StoreTransaction,
        securable: &EntityRef,
        grantee: &EntityRef,
        privilege: Privilege,
    ) -> CatalogResult<GrantRecord> {
        if !grantee.entity_type.is_grantee() {
            return Err(Error::invariant("grantee kind cannot receive grants").into());
        }
        let record = GrantRecord::new(securable.key(), grantee.key(), privilege);
        txn.write_grant_record(&record).await?;

        self.bump_grants_version(txn, grantee, "grantee").await?;
        self.bump_grants_version(txn, securable, "securable").await?;

        Ok(record)
    }

    /// Deletes a grant record, bumping the grants version of both
    /// endpoints by exactly one.
    pub(crate) async fn revoke_grant_record(
        &self,
        txn: &mut dyn StoreTransaction,
        securable: &EntityRef,
        grantee: &EntityRef,
        record: &GrantRecord,
    ) -> CatalogResult<()> {
        if record.securable_key() != securable.key() {
            return Err(Error::invariant("grant record securable mismatch").into());
        }
        if record.grantee_key() != grantee.key() {
            return Err(Error::invariant("grant record grantee mismatch").into());
        }
        if !grantee.entity_type.is_grantee() {
            return Err(Error::invariant("grantee kind cannot receive grants").into());
        }
        txn.delete_grant_record(record).await?;

        self.bump_grants_version(txn, grantee, "grantee").await?;
        self.bump_grants_version(txn, securable, "securable").await?;

        Ok(())
    }

    /// Reloads one endpoint and increments its `grant_records_version`
    /// through a conditional write. The endpoint was re-resolved moments
    /// ago, so absence here is corruption, not a race to report politely.
    async fn bump_grants_version(
        &self,
        txn: &mut dyn StoreTransaction,
        endpoint: &EntityRef,
        side: &str,
    ) -> CatalogResult<()> {
        let original = txn
            .lookup_entity(endpoint.catalog_id, endpoint.id, endpoint.entity_type)
            .await?
            .ok_or_else(|| Error::invariant(format!("{side} entity not found")))?;
        let bumped = original.with_grant_records_version(original.grant_records_version + 1);
        txn.write_entity(&bumped, false, Some(&original)).await?;
        Ok(())
    }
}
