//! The transactional persistence port.
//!
//! Every public catalog operation opens exactly one transaction, performs
//! all of its reads and conditional writes through it, then commits or rolls
//! back. The port never interprets entity semantics: consistency rules
//! (name uniqueness among *active* siblings aside, which the name index
//! enforces mechanically) belong to the engines above it.

use std::sync::Arc;

use async_trait::async_trait;

use trellis_core::{
    Entity, EntityId, EntityKey, EntitySubType, EntityType, Error, GrantRecord, PolicyKind,
    PolicyMappingRecord, PrincipalSecrets, Privilege, Result,
};

use crate::integration::StorageIntegration;
use crate::page::{Page, PageToken};

/// Predicate applied to entities during a listing.
pub type EntityFilter<'a> = dyn Fn(&Entity) -> bool + Send + Sync + 'a;

/// The lightweight record a by-name lookup returns when the caller only
/// needs identity, not content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityNameRecord {
    /// Id of the entity holding the name.
    pub id: EntityId,
    /// Sub-type of the entity holding the name.
    pub sub_type: EntitySubType,
}

/// The two version counters of one entity, as returned by the batch
/// version-lookup API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityVersions {
    /// Content version.
    pub entity_version: i32,
    /// Grant-records version.
    pub grant_records_version: i32,
}

/// Failure of a policy-mapping write.
///
/// The pre-write validity check is folded into the write: a backend without
/// a mapping store reports [`Unsupported`](Self::Unsupported) (callers treat
/// this as best-effort and move on), and a mapping that would violate the
/// one-per-`(target, kind)` invariant reports the conflicting record.
#[derive(Debug, thiserror::Error)]
pub enum PolicyMappingWriteError {
    /// The backend has no policy-mapping store.
    #[error("policy mappings are not supported by this backend")]
    Unsupported,
    /// A mapping of the same kind already exists on the target.
    #[error("a policy mapping of the same kind already exists on the target")]
    AlreadyExists {
        /// The conflicting record.
        existing: PolicyMappingRecord,
    },
    /// The underlying storage failed.
    #[error(transparent)]
    Store(#[from] Error),
}

/// Hands out units of work against the backing store.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Opens a read-only transaction (a consistent snapshot).
    async fn begin_read(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Opens a read-write transaction. Writers are serialized; the
    /// transaction publishes atomically on commit.
    async fn begin_read_write(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Provisions a storage integration for a catalog from its serialized
    /// storage configuration. Runs outside any transaction: integration
    /// creation may call an external service and must not hold the store's
    /// write path.
    async fn create_storage_integration(
        &self,
        catalog_key: EntityKey,
        storage_config: &str,
    ) -> Result<Arc<dyn StorageIntegration>>;
}

/// One unit of work: a consistent snapshot plus staged writes.
///
/// Dropping a transaction without committing discards every staged write.
#[async_trait]
pub trait StoreTransaction: Send {
    // --- Entities ---

    /// Allocates a fresh entity id.
    async fn generate_id(&mut self) -> Result<EntityId>;

    /// Looks up an active entity by composite id, checking its type.
    async fn lookup_entity(
        &self,
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
    ) -> Result<Option<Entity>>;

    /// Looks up an active entity by name among siblings.
    async fn lookup_entity_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>>;

    /// Looks up just the id and sub-type of the active entity holding a
    /// name, if any.
    async fn lookup_entity_handle_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<EntityNameRecord>>;

    /// Batch-resolves active entities by composite id; preserves order,
    /// `None` for misses.
    async fn lookup_entities(&self, keys: &[EntityKey]) -> Result<Vec<Option<Entity>>>;

    /// Batch-resolves the version counters of active entities; preserves
    /// order, `None` for entities that are gone.
    async fn lookup_entity_versions(&self, keys: &[EntityKey]) -> Result<Vec<Option<EntityVersions>>>;

    /// Pages through active entities under one parent, filtered by a
    /// predicate.
    async fn list_entities(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        filter: &EntityFilter<'_>,
        page: &PageToken,
    ) -> Result<Page<Entity>>;

    /// Returns true if any active entity (optionally restricted to one
    /// type) has the given parent.
    async fn has_children(
        &self,
        of_type: Option<EntityType>,
        catalog_id: EntityId,
        parent_id: EntityId,
    ) -> Result<bool>;

    /// Writes an entity.
    ///
    /// When `original` is supplied the write is conditional: it fails if
    /// the stored version no longer matches the original's. When
    /// `name_or_parent_changed` is set the by-name index is moved from the
    /// original's slot to the new one.
    ///
    /// # Errors
    ///
    /// Fails on a version conflict, or when the target name slot is taken
    /// by another active entity.
    async fn write_entity(
        &mut self,
        entity: &Entity,
        name_or_parent_changed: bool,
        original: Option<&Entity>,
    ) -> Result<()>;

    /// Soft-deletes an entity: removes it from the active set and its name
    /// slot, stamps its drop timestamp, and retains it in the dropped set.
    async fn delete_entity(&mut self, entity: &Entity) -> Result<()>;

    /// Deletes all metadata. Service decommissioning only.
    async fn delete_all(&mut self) -> Result<()>;

    // --- Grant records ---

    /// Persists a grant record.
    async fn write_grant_record(&mut self, record: &GrantRecord) -> Result<()>;

    /// Deletes a grant record.
    async fn delete_grant_record(&mut self, record: &GrantRecord) -> Result<()>;

    /// Looks up one grant record by its full identity.
    async fn lookup_grant_record(
        &self,
        securable: EntityKey,
        grantee: EntityKey,
        privilege: Privilege,
    ) -> Result<Option<GrantRecord>>;

    /// Loads every grant record on a securable.
    async fn load_grants_on_securable(&self, securable: EntityKey) -> Result<Vec<GrantRecord>>;

    /// Loads every grant record to a grantee.
    async fn load_grants_on_grantee(&self, grantee: EntityKey) -> Result<Vec<GrantRecord>>;

    /// Deletes every grant record touching `entity`, given the two sides
    /// the caller already loaded in this transaction.
    async fn delete_all_grant_records(
        &mut self,
        entity: &Entity,
        on_grantee: &[GrantRecord],
        on_securable: &[GrantRecord],
    ) -> Result<()>;

    // --- Policy mappings ---

    /// Returns true if this backend stores policy mappings. Checked once
    /// per operation; when false, mapping maintenance is skipped as
    /// best-effort.
    fn supports_policy_mappings(&self) -> bool;

    /// Persists a policy mapping after validating the
    /// one-per-`(target, kind)` invariant.
    async fn write_policy_mapping(
        &mut self,
        record: &PolicyMappingRecord,
    ) -> std::result::Result<(), PolicyMappingWriteError>;

    /// Deletes a policy mapping.
    async fn delete_policy_mapping(&mut self, record: &PolicyMappingRecord) -> Result<()>;

    /// Looks up one mapping by target, kind, and policy.
    async fn lookup_policy_mapping(
        &self,
        target: EntityKey,
        kind: PolicyKind,
        policy: EntityKey,
    ) -> Result<Option<PolicyMappingRecord>>;

    /// Loads every mapping on a target.
    async fn load_policies_on_target(&self, target: EntityKey) -> Result<Vec<PolicyMappingRecord>>;

    /// Loads the mappings of one kind on a target.
    async fn load_policies_on_target_by_kind(
        &self,
        target: EntityKey,
        kind: PolicyKind,
    ) -> Result<Vec<PolicyMappingRecord>>;

    /// Loads every mapping that attaches a policy to some target.
    async fn load_targets_on_policy(
        &self,
        policy: EntityKey,
        kind: PolicyKind,
    ) -> Result<Vec<PolicyMappingRecord>>;

    /// Deletes every mapping touching `entity`, given the two sides the
    /// caller already loaded in this transaction.
    async fn delete_all_policy_mappings(
        &mut self,
        entity: &Entity,
        on_target: &[PolicyMappingRecord],
        on_policy: &[PolicyMappingRecord],
    ) -> Result<()>;

    // --- Principal secrets ---

    /// Generates and persists fresh credentials for a principal; the
    /// returned record carries the plaintext secret exactly once.
    async fn generate_principal_secrets(
        &mut self,
        principal_id: EntityId,
    ) -> Result<PrincipalSecrets>;

    /// Loads the credentials stored for a client id.
    async fn load_principal_secrets(&self, client_id: &str) -> Result<Option<PrincipalSecrets>>;

    /// Rotates (or, when `reset` is set, fully regenerates) a principal's
    /// credentials. Returns `None` when no credentials exist for the
    /// client id / principal pair.
    async fn rotate_principal_secrets(
        &mut self,
        client_id: &str,
        principal_id: EntityId,
        reset: bool,
        old_secret_hash: &str,
    ) -> Result<Option<PrincipalSecrets>>;

    /// Deletes the credentials of a principal.
    async fn delete_principal_secrets(
        &mut self,
        client_id: &str,
        principal_id: EntityId,
    ) -> Result<()>;

    // --- Storage integrations ---

    /// Records a pre-provisioned storage integration against a catalog
    /// entity, if one was created. No-op when `integration` is `None`.
    async fn persist_storage_integration_if_needed(
        &mut self,
        catalog: &Entity,
        integration: Option<&Arc<dyn StorageIntegration>>,
    ) -> Result<()>;

    /// Loads the storage integration attached to an entity, if any.
    async fn load_storage_integration(
        &self,
        entity: &Entity,
    ) -> Result<Option<Arc<dyn StorageIntegration>>>;

    // --- Transaction boundary ---

    /// Publishes every staged write atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every staged write.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
