//! The universal entity model.
//!
//! Every node in the catalog hierarchy — catalog, namespace, role, principal,
//! task, policy — is an [`Entity`]. Entities carry two independent version
//! counters:
//!
//! - `entity_version` is bumped on every content mutation (name, parent,
//!   properties) and serves as the optimistic-concurrency token.
//! - `grant_records_version` is bumped whenever a grant record referencing
//!   the entity (as either endpoint) is added or removed, letting callers
//!   cache grants and detect staleness without reloading entity content.
//!
//! Stored snapshots are never mutated in place: [`Entity::to_builder`]
//! produces a copy-with-changes builder, and the original snapshot is handed
//! to the persistence port as the expected-previous-state of the conditional
//! write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EntityId, EntityKey};

/// Name of the root container entity.
pub const ROOT_CONTAINER_NAME: &str = "root";

/// Name of the bootstrap root principal.
pub const ROOT_PRINCIPAL_NAME: &str = "root";

/// Name of the principal role holding top-level service privileges.
pub const SERVICE_ADMIN_ROLE_NAME: &str = "service_admin";

/// Name of the automatically provisioned admin role of each catalog.
pub const CATALOG_ADMIN_ROLE_NAME: &str = "catalog_admin";

/// Internal-property key holding a principal's client id.
pub const CLIENT_ID_PROPERTY: &str = "client-id";

/// Internal-property key marking a principal as requiring credential
/// rotation before further use.
pub const ROTATION_REQUIRED_PROPERTY: &str = "rotation-required";

/// Internal-property key holding a catalog's serialized storage
/// configuration.
pub const STORAGE_CONFIG_PROPERTY: &str = "storage-config";

/// Internal-property key holding the identifier of a catalog's provisioned
/// storage integration.
pub const STORAGE_INTEGRATION_ID_PROPERTY: &str = "storage-integration-id";

/// The closed set of entity kinds.
///
/// Kind-specific behavior (who may receive grants, what is protected from
/// drop/rename, what lives at the top level) is expressed as capability
/// methods so that new kinds are handled exhaustively at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// The singleton root container; securable for service-level grants.
    Root,
    /// A service principal (an authenticatable identity).
    Principal,
    /// A role grantable to principals.
    PrincipalRole,
    /// A top-level catalog of namespaces and tables.
    Catalog,
    /// A role scoped to a single catalog.
    CatalogRole,
    /// A namespace within a catalog.
    Namespace,
    /// A table-like object (table or view) within a namespace.
    TableLike,
    /// An asynchronous work item, stored as an entity so the task queue can
    /// reuse entity versioning for leases.
    Task,
    /// A policy attachable to catalogs, namespaces, or tables.
    Policy,
}

impl EntityType {
    /// Stable numeric code used by the persistence port.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Root => 1,
            Self::Principal => 2,
            Self::PrincipalRole => 3,
            Self::Catalog => 4,
            Self::CatalogRole => 5,
            Self::Namespace => 6,
            Self::TableLike => 7,
            Self::Task => 8,
            Self::Policy => 9,
        }
    }

    /// Resolves a numeric code back to a type; unknown codes fail closed.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Root),
            2 => Some(Self::Principal),
            3 => Some(Self::PrincipalRole),
            4 => Some(Self::Catalog),
            5 => Some(Self::CatalogRole),
            6 => Some(Self::Namespace),
            7 => Some(Self::TableLike),
            8 => Some(Self::Task),
            9 => Some(Self::Policy),
            _ => None,
        }
    }

    /// Returns true if entities of this kind may receive grants.
    #[must_use]
    pub const fn is_grantee(self) -> bool {
        matches!(self, Self::Principal | Self::PrincipalRole | Self::CatalogRole)
    }

    /// Returns true if entities of this kind live outside any catalog
    /// (their catalog id is [`EntityId::NULL`] and their parent is the root
    /// container).
    #[must_use]
    pub const fn is_top_level(self) -> bool {
        matches!(
            self,
            Self::Root | Self::Principal | Self::PrincipalRole | Self::Catalog | Self::Task
        )
    }

    /// Returns true if entities of this kind are protected system entities
    /// that can never be dropped or renamed.
    #[must_use]
    pub const fn is_protected(self) -> bool {
        matches!(self, Self::Root)
    }
}

/// Sub-kind discriminator for [`EntityType::TableLike`] entities.
///
/// `Any` is a filter wildcard used by lookups and listings; it is never
/// stored on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitySubType {
    /// Matches every sub-type; only valid in lookups.
    Any,
    /// No sub-type.
    #[default]
    Null,
    /// A table.
    Table,
    /// A view.
    View,
}

impl EntitySubType {
    /// Stable numeric code used by the persistence port.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Any => -1,
            Self::Null => 0,
            Self::Table => 1,
            Self::View => 2,
        }
    }

    /// Returns true if this sub-type matches `other` when used as a filter.
    #[must_use]
    pub fn matches(self, other: Self) -> bool {
        self == Self::Any || self == other
    }
}

/// A versioned node in the catalog hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Id of the containing catalog, or [`EntityId::NULL`] for top-level
    /// entities.
    pub catalog_id: EntityId,
    /// Id of this entity; unique together with `catalog_id`.
    pub id: EntityId,
    /// Id of the containing entity ([`EntityId::ROOT`] for top-level
    /// entities).
    pub parent_id: EntityId,
    /// Kind of this entity.
    pub entity_type: EntityType,
    /// Sub-kind of this entity; [`EntitySubType::Null`] unless table-like.
    pub sub_type: EntitySubType,
    /// Name, unique among active siblings of the same kind.
    pub name: String,
    /// Optimistic-concurrency token, bumped on every content mutation.
    pub entity_version: i32,
    /// Grant staleness token, bumped on every grant add/remove touching
    /// this entity. Independent of `entity_version`.
    pub grant_records_version: i32,
    /// When the entity was created.
    pub create_timestamp: DateTime<Utc>,
    /// When the entity was dropped; `None` while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_timestamp: Option<DateTime<Utc>>,
    /// When the entity content last changed.
    pub last_update_timestamp: DateTime<Utc>,
    /// User-visible properties, opaque to the core.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// System bookkeeping invisible to the owning user (client ids,
    /// rotation flags, storage configuration).
    #[serde(default)]
    pub internal_properties: BTreeMap<String, String>,
}

impl Entity {
    /// Creates a new active entity with fresh version counters.
    ///
    /// The persistence step re-stamps the timestamps, so callers building an
    /// entity ahead of a create call don't need to care about them.
    #[must_use]
    pub fn new(
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
        sub_type: EntitySubType,
        parent_id: EntityId,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            catalog_id,
            id,
            parent_id,
            entity_type,
            sub_type,
            name: name.into(),
            entity_version: 1,
            grant_records_version: 1,
            create_timestamp: now,
            drop_timestamp: None,
            last_update_timestamp: now,
            properties: BTreeMap::new(),
            internal_properties: BTreeMap::new(),
        }
    }

    /// Returns the composite identity of this entity.
    #[must_use]
    pub const fn key(&self) -> EntityKey {
        EntityKey::new(self.catalog_id, self.id)
    }

    /// Returns true if the entity has been dropped.
    #[must_use]
    pub const fn is_dropped(&self) -> bool {
        self.drop_timestamp.is_some()
    }

    /// Returns true if this entity is a protected system entity that can
    /// never be dropped or renamed.
    #[must_use]
    pub const fn cannot_be_dropped_or_renamed(&self) -> bool {
        self.entity_type.is_protected()
    }

    /// Starts a copy-with-changes builder from this snapshot.
    #[must_use]
    pub fn to_builder(&self) -> EntityBuilder {
        EntityBuilder {
            inner: self.clone(),
        }
    }

    /// Returns a copy with only `grant_records_version` replaced.
    #[must_use]
    pub fn with_grant_records_version(&self, version: i32) -> Self {
        let mut copy = self.clone();
        copy.grant_records_version = version;
        copy
    }
}

/// Copy-with-changes construction of a new [`Entity`] value from an old one.
///
/// Fetched snapshots are never mutated in place: the original is also passed
/// to the persistence port as the expected-previous-state for conditional
/// writes, so it must survive unchanged.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    inner: Entity,
}

impl EntityBuilder {
    /// Starts a builder for a brand-new entity.
    #[must_use]
    pub fn new(
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
        sub_type: EntitySubType,
        parent_id: EntityId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Entity::new(catalog_id, id, entity_type, sub_type, parent_id, name),
        }
    }

    /// Replaces the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Replaces the parent id.
    #[must_use]
    pub fn parent_id(mut self, parent_id: EntityId) -> Self {
        self.inner.parent_id = parent_id;
        self
    }

    /// Replaces the entity version.
    #[must_use]
    pub fn entity_version(mut self, version: i32) -> Self {
        self.inner.entity_version = version;
        self
    }

    /// Replaces the grant-records version.
    #[must_use]
    pub fn grant_records_version(mut self, version: i32) -> Self {
        self.inner.grant_records_version = version;
        self
    }

    /// Replaces the user-visible properties.
    #[must_use]
    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.inner.properties = properties;
        self
    }

    /// Replaces the internal properties.
    #[must_use]
    pub fn internal_properties(mut self, internal_properties: BTreeMap<String, String>) -> Self {
        self.inner.internal_properties = internal_properties;
        self
    }

    /// Inserts one internal property.
    #[must_use]
    pub fn internal_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner
            .internal_properties
            .insert(key.into(), value.into());
        self
    }

    /// Replaces the creation timestamp.
    #[must_use]
    pub fn create_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.inner.create_timestamp = at;
        self
    }

    /// Replaces the drop timestamp.
    #[must_use]
    pub fn drop_timestamp(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.inner.drop_timestamp = at;
        self
    }

    /// Replaces the last-update timestamp.
    #[must_use]
    pub fn last_update_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.inner.last_update_timestamp = at;
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> Entity {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(name: &str) -> Entity {
        Entity::new(
            EntityId::new(10),
            EntityId::new(11),
            EntityType::Namespace,
            EntitySubType::Null,
            EntityId::new(10),
            name,
        )
    }

    #[test]
    fn type_codes_roundtrip() {
        for ty in [
            EntityType::Root,
            EntityType::Principal,
            EntityType::PrincipalRole,
            EntityType::Catalog,
            EntityType::CatalogRole,
            EntityType::Namespace,
            EntityType::TableLike,
            EntityType::Task,
            EntityType::Policy,
        ] {
            assert_eq!(EntityType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(EntityType::from_code(0), None);
    }

    #[test]
    fn grantee_capability() {
        assert!(EntityType::Principal.is_grantee());
        assert!(EntityType::PrincipalRole.is_grantee());
        assert!(EntityType::CatalogRole.is_grantee());
        assert!(!EntityType::Catalog.is_grantee());
        assert!(!EntityType::Namespace.is_grantee());
    }

    #[test]
    fn only_root_is_protected() {
        assert!(EntityType::Root.is_protected());
        assert!(!EntityType::Catalog.is_protected());
        assert!(!EntityType::Principal.is_protected());
    }

    #[test]
    fn subtype_any_matches_everything() {
        assert!(EntitySubType::Any.matches(EntitySubType::Table));
        assert!(EntitySubType::Any.matches(EntitySubType::Null));
        assert!(EntitySubType::Table.matches(EntitySubType::Table));
        assert!(!EntitySubType::Table.matches(EntitySubType::View));
    }

    #[test]
    fn builder_leaves_original_untouched() {
        let original = namespace("before");
        let renamed = original.to_builder().name("after").entity_version(2).build();
        assert_eq!(original.name, "before");
        assert_eq!(original.entity_version, 1);
        assert_eq!(renamed.name, "after");
        assert_eq!(renamed.entity_version, 2);
    }

    #[test]
    fn new_entity_is_active_with_initial_versions() {
        let entity = namespace("fresh");
        assert!(!entity.is_dropped());
        assert_eq!(entity.entity_version, 1);
        assert_eq!(entity.grant_records_version, 1);
    }

    #[test]
    fn with_grant_records_version_only_touches_that_counter() {
        let entity = namespace("ns");
        let bumped = entity.with_grant_records_version(5);
        assert_eq!(bumped.grant_records_version, 5);
        assert_eq!(bumped.entity_version, entity.entity_version);
        assert_eq!(bumped.name, entity.name);
    }
}
