//! Policy mapping attachment and lookup.

use std::collections::BTreeMap;

use trellis_core::policy::{is_valid_policy_target, policy_kind_of};
use trellis_core::{Entity, EntityKey, EntityType, PolicyKind, PolicyMappingRecord};
use trellis_store::{PolicyMappingWriteError, StoreTransaction};

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;
use crate::resolver::{resolve_path_with_entities, EntityRef};
use crate::results::LoadPolicyMappingsOutput;

impl CatalogManager {
    /// Attaches a policy to a target entity.
    ///
    /// At most one policy of a given kind may be attached to a target; a
    /// second attachment of the same kind fails with the conflicting kind.
    #[tracing::instrument(skip_all, fields(target = %target.key(), policy = %policy.key()))]
    pub async fn attach_policy_to_entity(
        &self,
        target_catalog_path: &[EntityRef],
        target: &EntityRef,
        policy_catalog_path: &[EntityRef],
        policy: &EntityRef,
        parameters: BTreeMap<String, String>,
    ) -> CatalogResult<PolicyMappingRecord> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            let kind = Self::resolve_policy_attachment(
                txn.as_ref(),
                target_catalog_path,
                target,
                policy_catalog_path,
                policy,
            )
            .await?;

            if !is_valid_policy_target(target.entity_type, target.sub_type) {
                return Err(CatalogError::Unexpected {
                    message: format!(
                        "entities of kind {:?} cannot have policies attached",
                        target.entity_type
                    ),
                });
            }

            let record = PolicyMappingRecord::new(target.key(), policy.key(), kind, parameters);
            match txn.write_policy_mapping(&record).await {
                Ok(()) => Ok(record),
                Err(PolicyMappingWriteError::AlreadyExists { existing }) => {
                    Err(CatalogError::PolicyMappingOfSameKindExists {
                        kind: existing.policy_kind,
                    })
                }
                Err(PolicyMappingWriteError::Unsupported) => Err(CatalogError::Unexpected {
                    message: "policy mappings are not supported by this backend".to_owned(),
                }),
                Err(PolicyMappingWriteError::Store(error)) => Err(error.into()),
            }
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Detaches a policy from a target entity.
    #[tracing::instrument(skip_all, fields(target = %target.key(), policy = %policy.key()))]
    pub async fn detach_policy_from_entity(
        &self,
        target_catalog_path: &[EntityRef],
        target: &EntityRef,
        policy_catalog_path: &[EntityRef],
        policy: &EntityRef,
    ) -> CatalogResult<PolicyMappingRecord> {
        let mut txn = self.store.begin_read_write().await?;
        let outcome = async {
            let kind = Self::resolve_policy_attachment(
                txn.as_ref(),
                target_catalog_path,
                target,
                policy_catalog_path,
                policy,
            )
            .await?;

            let Some(record) = txn
                .lookup_policy_mapping(target.key(), kind, policy.key())
                .await?
            else {
                return Err(CatalogError::PolicyMappingNotFound);
            };
            txn.delete_policy_mapping(&record).await?;
            Ok(record)
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Loads every policy attached to a target entity.
    pub async fn load_policies_on_entity(
        &self,
        target: &EntityRef,
    ) -> CatalogResult<LoadPolicyMappingsOutput> {
        self.load_policies_filtered(target, None).await
    }

    /// Loads the policies of one kind attached to a target entity.
    pub async fn load_policies_on_entity_by_kind(
        &self,
        target: &EntityRef,
        kind: PolicyKind,
    ) -> CatalogResult<LoadPolicyMappingsOutput> {
        self.load_policies_filtered(target, Some(kind)).await
    }

    async fn load_policies_filtered(
        &self,
        target: &EntityRef,
        kind: Option<PolicyKind>,
    ) -> CatalogResult<LoadPolicyMappingsOutput> {
        let txn = self.store.begin_read().await?;
        let outcome = async {
            if txn
                .lookup_entity(target.catalog_id, target.id, target.entity_type)
                .await?
                .is_none()
            {
                return Err(CatalogError::EntityNotFound);
            }
            let records = match kind {
                Some(kind) => {
                    txn.load_policies_on_target_by_kind(target.key(), kind)
                        .await?
                }
                None => txn.load_policies_on_target(target.key()).await?,
            };
            let policy_entities =
                Self::dereference_policies(txn.as_ref(), &records).await?;
            Ok(LoadPolicyMappingsOutput {
                mapping_records: records,
                policy_entities,
            })
        }
        .await;
        self.finish(txn, outcome).await
    }

    /// Re-resolves both sides of a policy attachment and reads the policy's
    /// kind off the stored policy entity.
    async fn resolve_policy_attachment(
        txn: &dyn StoreTransaction,
        target_catalog_path: &[EntityRef],
        target: &EntityRef,
        policy_catalog_path: &[EntityRef],
        policy: &EntityRef,
    ) -> CatalogResult<PolicyKind> {
        Self::entity_unresolved(
            resolve_path_with_entities(txn, Some(target_catalog_path), Some(target), &[]).await?,
        )?;
        Self::entity_unresolved(
            resolve_path_with_entities(txn, Some(policy_catalog_path), Some(policy), &[]).await?,
        )?;

        let policy_entity = txn
            .lookup_entity(policy.catalog_id, policy.id, EntityType::Policy)
            .await?
            .ok_or(CatalogError::EntityUnresolved)?;
        policy_kind_of(&policy_entity).ok_or_else(|| CatalogError::Unexpected {
            message: "unknown policy kind".to_owned(),
        })
    }

    /// Dereferences the distinct policy entities a set of mapping records
    /// point to, skipping any that no longer resolve.
    async fn dereference_policies(
        txn: &dyn StoreTransaction,
        records: &[PolicyMappingRecord],
    ) -> CatalogResult<Vec<Entity>> {
        let mut keys: Vec<EntityKey> = Vec::new();
        for key in records.iter().map(PolicyMappingRecord::policy_key) {
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
}
