//! In-memory transactional backend.
//!
//! [`InMemoryStore`] implements the persistence port with snapshot-isolated,
//! single-writer transactions:
//!
//! - A read-write transaction takes an owned writer guard, clones the
//!   current state, stages every write against the clone, and publishes the
//!   clone atomically on commit. Rollback (explicit, or dropping the
//!   transaction) publishes nothing.
//! - A read transaction is a plain clone of the current state; staged writes
//!   in a read transaction are discarded.
//!
//! ## Limitations
//!
//! - **Single-process only**: no durability, no cross-process coordination
//! - **Whole-state clone per transaction**: fine for tests and small
//!   deployments, not for production data volumes

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use trellis_core::{
    Entity, EntityId, EntityKey, EntityType, Error, GrantRecord, PolicyKind, PolicyMappingRecord,
    PrincipalSecrets, Privilege, Result,
};

use crate::integration::{StaticStorageIntegration, StorageIntegration};
use crate::page::{Page, PageToken};
use crate::port::{
    EntityFilter, EntityNameRecord, EntityVersions, MetaStore, PolicyMappingWriteError,
    StoreTransaction,
};

/// Slot in the by-name index: one active entity per
/// `(catalog, parent, type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NameKey {
    catalog_id: EntityId,
    parent_id: EntityId,
    type_code: i32,
    name: String,
}

impl NameKey {
    fn of(entity: &Entity) -> Self {
        Self {
            catalog_id: entity.catalog_id,
            parent_id: entity.parent_id,
            type_code: entity.entity_type.code(),
            name: entity.name.clone(),
        }
    }
}

/// Grant records keyed by (securable, grantee, privilege code).
type GrantKey = (EntityKey, EntityKey, i32);

/// Policy mappings keyed by (target, kind code, policy).
type MappingKey = (EntityKey, i32, EntityKey);

#[derive(Debug, Clone, Default)]
struct StoreState {
    next_id: i64,
    active: HashMap<EntityKey, Entity>,
    by_name: HashMap<NameKey, EntityKey>,
    dropped: HashMap<EntityKey, Entity>,
    grants: BTreeMap<GrantKey, GrantRecord>,
    mappings: BTreeMap<MappingKey, PolicyMappingRecord>,
    secrets: HashMap<String, PrincipalSecrets>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory implementation of the persistence port.
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    integration: Arc<dyn StorageIntegration>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store with the static credential-vending double.
    #[must_use]
    pub fn new() -> Self {
        Self::with_integration(Arc::new(StaticStorageIntegration))
    }

    /// Creates an empty store vending credentials through `integration`.
    #[must_use]
    pub fn with_integration(integration: Arc<dyn StorageIntegration>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                next_id: 1,
                ..StoreState::default()
            })),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            integration,
        }
    }

    /// Returns the number of active entities. Test observability.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn active_entity_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.active.len())
    }

    /// Returns the number of dropped entities retained in the dropped set.
    /// Test observability.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn dropped_entity_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.dropped.len())
    }

    fn snapshot(&self) -> Result<StoreState> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.clone())
    }
}

#[async_trait]
impl MetaStore for InMemoryStore {
    async fn begin_read(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            working: self.snapshot()?,
            integration: Arc::clone(&self.integration),
            _writer: None,
        }))
    }

    async fn begin_read_write(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        // Snapshot after the guard: this transaction sees every committed
        // write of the previous writer.
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            working: self.snapshot()?,
            integration: Arc::clone(&self.integration),
            _writer: Some(guard),
        }))
    }

    async fn create_storage_integration(
        &self,
        _catalog_key: EntityKey,
        storage_config: &str,
    ) -> Result<Arc<dyn StorageIntegration>> {
        if storage_config.is_empty() {
            return Err(Error::storage("empty storage configuration"));
        }
        Ok(Arc::clone(&self.integration))
    }
}

/// One in-memory unit of work.
pub struct MemoryTransaction {
    shared: Arc<RwLock<StoreState>>,
    working: StoreState,
    integration: Arc<dyn StorageIntegration>,
    _writer: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    fn entity_at(&self, key: EntityKey) -> Option<&Entity> {
        self.working.active.get(&key)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn generate_id(&mut self) -> Result<EntityId> {
        let id = self.working.next_id;
        self.working.next_id += 1;
        Ok(EntityId::new(id))
    }

    async fn lookup_entity(
        &self,
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
    ) -> Result<Option<Entity>> {
        Ok(self
            .entity_at(EntityKey::new(catalog_id, id))
            .filter(|e| e.entity_type == entity_type)
            .cloned())
    }

    async fn lookup_entity_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>> {
        let key = NameKey {
            catalog_id,
            parent_id,
            type_code: entity_type.code(),
            name: name.to_owned(),
        };
        Ok(self
            .working
            .by_name
            .get(&key)
            .and_then(|entity_key| self.working.active.get(entity_key))
            .cloned())
    }

    async fn lookup_entity_handle_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<EntityNameRecord>> {
        Ok(self
            .lookup_entity_by_name(catalog_id, parent_id, entity_type, name)
            .await?
            .map(|entity| EntityNameRecord {
                id: entity.id,
                sub_type: entity.sub_type,
            }))
    }

    async fn lookup_entities(&self, keys: &[EntityKey]) -> Result<Vec<Option<Entity>>> {
        Ok(keys.iter().map(|key| self.entity_at(*key).cloned()).collect())
    }

    async fn lookup_entity_versions(
        &self,
        keys: &[EntityKey],
    ) -> Result<Vec<Option<EntityVersions>>> {
        Ok(keys
            .iter()
            .map(|key| {
                self.entity_at(*key).map(|entity| EntityVersions {
                    entity_version: entity.entity_version,
                    grant_records_version: entity.grant_records_version,
                })
            })
            .collect())
    }

    async fn list_entities(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        entity_type: EntityType,
        filter: &EntityFilter<'_>,
        page: &PageToken,
    ) -> Result<Page<Entity>> {
        let mut matching: Vec<Entity> = self
            .working
            .active
            .values()
            .filter(|e| {
                e.catalog_id == catalog_id
                    && e.parent_id == parent_id
                    && e.entity_type == entity_type
                    && filter(e)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.id);
        Ok(Page::from_listing(matching, page))
    }

    async fn has_children(
        &self,
        of_type: Option<EntityType>,
        catalog_id: EntityId,
        parent_id: EntityId,
    ) -> Result<bool> {
        Ok(self.working.active.values().any(|e| {
            e.catalog_id == catalog_id
                && e.parent_id == parent_id
                && of_type.is_none_or(|ty| e.entity_type == ty)
        }))
    }

    async fn write_entity(
        &mut self,
        entity: &Entity,
        name_or_parent_changed: bool,
        original: Option<&Entity>,
    ) -> Result<()> {
        let key = entity.key();
        match original {
            Some(original) => {
                let stored = self.working.active.get(&key).ok_or_else(|| {
                    Error::storage(format!("conditional write against missing entity {key}"))
                })?;
                if stored.entity_version != original.entity_version {
                    return Err(Error::storage(format!(
                        "conditional write conflict on {key}: stored version {} != expected {}",
                        stored.entity_version, original.entity_version
                    )));
                }
                if name_or_parent_changed {
                    let new_slot = NameKey::of(entity);
                    if let Some(holder) = self.working.by_name.get(&new_slot) {
                        if *holder != key {
                            return Err(Error::storage(format!(
                                "name slot already taken by {holder}"
                            )));
                        }
                    }
                    self.working.by_name.remove(&NameKey::of(original));
                    self.working.by_name.insert(new_slot, key);
                }
            }
            None => {
                if self.working.active.contains_key(&key) {
                    return Err(Error::storage(format!("entity {key} already exists")));
                }
                let slot = NameKey::of(entity);
                if self.working.by_name.contains_key(&slot) {
                    return Err(Error::storage(format!(
                        "name '{}' already taken under parent {}",
                        entity.name, entity.parent_id
                    )));
                }
                self.working.by_name.insert(slot, key);
            }
        }
        self.working.active.insert(key, entity.clone());
        Ok(())
    }

    async fn delete_entity(&mut self, entity: &Entity) -> Result<()> {
        let key = entity.key();
        let Some(mut stored) = self.working.active.remove(&key) else {
            return Err(Error::storage(format!("cannot delete missing entity {key}")));
        };
        self.working.by_name.remove(&NameKey::of(&stored));
        if stored.drop_timestamp.is_none() {
            stored.drop_timestamp = Some(Utc::now());
        }
        self.working.dropped.insert(key, stored);
        Ok(())
    }

    async fn delete_all(&mut self) -> Result<()> {
        let next_id = self.working.next_id;
        self.working = StoreState {
            next_id,
            ..StoreState::default()
        };
        Ok(())
    }

    async fn write_grant_record(&mut self, record: &GrantRecord) -> Result<()> {
        let key = (
            record.securable_key(),
            record.grantee_key(),
            record.privilege.code(),
        );
        self.working.grants.insert(key, *record);
        Ok(())
    }

    async fn delete_grant_record(&mut self, record: &GrantRecord) -> Result<()> {
        let key = (
            record.securable_key(),
            record.grantee_key(),
            record.privilege.code(),
        );
        self.working
            .grants
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::storage("cannot delete missing grant record"))
    }

    async fn lookup_grant_record(
        &self,
        securable: EntityKey,
        grantee: EntityKey,
        privilege: Privilege,
    ) -> Result<Option<GrantRecord>> {
        Ok(self
            .working
            .grants
            .get(&(securable, grantee, privilege.code()))
            .copied())
    }

    async fn load_grants_on_securable(&self, securable: EntityKey) -> Result<Vec<GrantRecord>> {
        Ok(self
            .working
            .grants
            .values()
            .filter(|r| r.securable_key() == securable)
            .copied()
            .collect())
    }

    async fn load_grants_on_grantee(&self, grantee: EntityKey) -> Result<Vec<GrantRecord>> {
        Ok(self
            .working
            .grants
            .values()
            .filter(|r| r.grantee_key() == grantee)
            .copied()
            .collect())
    }

    async fn delete_all_grant_records(
        &mut self,
        _entity: &Entity,
        on_grantee: &[GrantRecord],
        on_securable: &[GrantRecord],
    ) -> Result<()> {
        for record in on_grantee.iter().chain(on_securable) {
            let key = (
                record.securable_key(),
                record.grantee_key(),
                record.privilege.code(),
            );
            self.working.grants.remove(&key);
        }
        Ok(())
    }

    fn supports_policy_mappings(&self) -> bool {
        true
    }

    async fn write_policy_mapping(
        &mut self,
        record: &PolicyMappingRecord,
    ) -> std::result::Result<(), PolicyMappingWriteError> {
        let target = record.target_key();
        let existing = self
            .working
            .mappings
            .values()
            .find(|r| {
                r.target_key() == target
                    && r.policy_kind == record.policy_kind
                    && r.policy_key() != record.policy_key()
            })
            .cloned();
        if let Some(existing) = existing {
            return Err(PolicyMappingWriteError::AlreadyExists { existing });
        }
        self.working.mappings.insert(
            (target, record.policy_kind.code(), record.policy_key()),
            record.clone(),
        );
        Ok(())
    }

    async fn delete_policy_mapping(&mut self, record: &PolicyMappingRecord) -> Result<()> {
        let key = (
            record.target_key(),
            record.policy_kind.code(),
            record.policy_key(),
        );
        self.working
            .mappings
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::storage("cannot delete missing policy mapping"))
    }

    async fn lookup_policy_mapping(
        &self,
        target: EntityKey,
        kind: PolicyKind,
        policy: EntityKey,
    ) -> Result<Option<PolicyMappingRecord>> {
        Ok(self
            .working
            .mappings
            .get(&(target, kind.code(), policy))
            .cloned())
    }

    async fn load_policies_on_target(&self, target: EntityKey) -> Result<Vec<PolicyMappingRecord>> {
        Ok(self
            .working
            .mappings
            .values()
            .filter(|r| r.target_key() == target)
            .cloned()
            .collect())
    }

    async fn load_policies_on_target_by_kind(
        &self,
        target: EntityKey,
        kind: PolicyKind,
    ) -> Result<Vec<PolicyMappingRecord>> {
        Ok(self
            .working
            .mappings
            .values()
            .filter(|r| r.target_key() == target && r.policy_kind == kind)
            .cloned()
            .collect())
    }

    async fn load_targets_on_policy(
        &self,
        policy: EntityKey,
        kind: PolicyKind,
    ) -> Result<Vec<PolicyMappingRecord>> {
        Ok(self
            .working
            .mappings
            .values()
            .filter(|r| r.policy_key() == policy && r.policy_kind == kind)
            .cloned()
            .collect())
    }

    async fn delete_all_policy_mappings(
        &mut self,
        _entity: &Entity,
        on_target: &[PolicyMappingRecord],
        on_policy: &[PolicyMappingRecord],
    ) -> Result<()> {
        for record in on_target.iter().chain(on_policy) {
            let key = (
                record.target_key(),
                record.policy_kind.code(),
                record.policy_key(),
            );
            self.working.mappings.remove(&key);
        }
        Ok(())
    }

    async fn generate_principal_secrets(
        &mut self,
        principal_id: EntityId,
    ) -> Result<PrincipalSecrets> {
        let secrets = PrincipalSecrets::generate(principal_id);
        self.working
            .secrets
            .insert(secrets.principal_client_id.clone(), secrets.stored());
        Ok(secrets)
    }

    async fn load_principal_secrets(&self, client_id: &str) -> Result<Option<PrincipalSecrets>> {
        Ok(self.working.secrets.get(client_id).cloned())
    }

    async fn rotate_principal_secrets(
        &mut self,
        client_id: &str,
        principal_id: EntityId,
        reset: bool,
        old_secret_hash: &str,
    ) -> Result<Option<PrincipalSecrets>> {
        let Some(stored) = self.working.secrets.get(client_id) else {
            return Ok(None);
        };
        if stored.principal_id != principal_id {
            return Ok(None);
        }
        let mut rotated = stored.clone();
        if reset {
            rotated.reset();
        } else {
            rotated.rotate(old_secret_hash);
        }
        self.working
            .secrets
            .insert(client_id.to_owned(), rotated.stored());
        Ok(Some(rotated))
    }

    async fn delete_principal_secrets(
        &mut self,
        client_id: &str,
        principal_id: EntityId,
    ) -> Result<()> {
        if let Some(stored) = self.working.secrets.get(client_id) {
            if stored.principal_id == principal_id {
                self.working.secrets.remove(client_id);
            }
        }
        Ok(())
    }

    async fn persist_storage_integration_if_needed(
        &mut self,
        _catalog: &Entity,
        _integration: Option<&Arc<dyn StorageIntegration>>,
    ) -> Result<()> {
        // The in-memory backend vends through a single shared integration;
        // there is nothing to record per catalog.
        Ok(())
    }

    async fn load_storage_integration(
        &self,
        entity: &Entity,
    ) -> Result<Option<Arc<dyn StorageIntegration>>> {
        if entity
            .internal_properties
            .contains_key(trellis_core::entity::STORAGE_CONFIG_PROPERTY)
        {
            Ok(Some(Arc::clone(&self.integration)))
        } else {
            Ok(None)
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut shared = self.shared.write().map_err(poison_err)?;
        *shared = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Dropping the working copy (and the writer guard) is the rollback.
        Ok(())
    }
}
