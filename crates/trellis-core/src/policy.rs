//! Policy kinds and policy mapping records.
//!
//! Policies are entities of kind [`EntityType::Policy`]; a policy mapping
//! record attaches one policy to one target entity. The store enforces the
//! mapping invariant: at most one mapping per `(target, policy kind)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntitySubType, EntityType};
use crate::id::{EntityId, EntityKey};

/// Internal-property key holding a policy entity's kind code.
pub const POLICY_KIND_PROPERTY: &str = "policy-kind";

/// The closed set of policy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Governs background compaction of table data files.
    DataCompaction,
    /// Governs background compaction of table metadata.
    MetadataCompaction,
    /// Governs expiry of old table snapshots.
    SnapshotExpiry,
    /// Governs removal of files no longer referenced by any snapshot.
    OrphanFileRemoval,
}

impl PolicyKind {
    /// Stable numeric code used by the persistence port.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::DataCompaction => 1,
            Self::MetadataCompaction => 2,
            Self::SnapshotExpiry => 3,
            Self::OrphanFileRemoval => 4,
        }
    }

    /// Resolves a numeric code back to a kind; unknown codes fail closed.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::DataCompaction),
            2 => Some(Self::MetadataCompaction),
            3 => Some(Self::SnapshotExpiry),
            4 => Some(Self::OrphanFileRemoval),
            _ => None,
        }
    }

    /// Returns true if mappings of this kind cascade from a target to the
    /// entities it contains.
    #[must_use]
    pub const fn inheritable(self) -> bool {
        match self {
            Self::DataCompaction
            | Self::MetadataCompaction
            | Self::SnapshotExpiry
            | Self::OrphanFileRemoval => true,
        }
    }
}

/// Reads the policy kind off a policy entity's internal properties.
///
/// Returns `None` for non-policy entities and for unknown kind codes.
#[must_use]
pub fn policy_kind_of(entity: &Entity) -> Option<PolicyKind> {
    if entity.entity_type != EntityType::Policy {
        return None;
    }
    entity
        .internal_properties
        .get(POLICY_KIND_PROPERTY)
        .and_then(|raw| raw.parse::<i32>().ok())
        .and_then(PolicyKind::from_code)
}

/// Returns true if an entity of the given type/sub-type may have policies
/// attached to it.
#[must_use]
pub fn is_valid_policy_target(entity_type: EntityType, sub_type: EntitySubType) -> bool {
    match entity_type {
        EntityType::Catalog | EntityType::Namespace => true,
        EntityType::TableLike => sub_type == EntitySubType::Table,
        _ => false,
    }
}

/// One policy attached to one target entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMappingRecord {
    /// Catalog id of the target entity.
    pub target_catalog_id: EntityId,
    /// Id of the target entity.
    pub target_id: EntityId,
    /// Catalog id of the policy entity.
    pub policy_catalog_id: EntityId,
    /// Id of the policy entity.
    pub policy_id: EntityId,
    /// Kind of the attached policy.
    pub policy_kind: PolicyKind,
    /// Attachment parameters, opaque to the core.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl PolicyMappingRecord {
    /// Creates a mapping record between a target and a policy.
    #[must_use]
    pub const fn new(
        target: EntityKey,
        policy: EntityKey,
        policy_kind: PolicyKind,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            target_catalog_id: target.catalog_id,
            target_id: target.entity_id,
            policy_catalog_id: policy.catalog_id,
            policy_id: policy.entity_id,
            policy_kind,
            parameters,
        }
    }

    /// Returns the composite identity of the target entity.
    #[must_use]
    pub const fn target_key(&self) -> EntityKey {
        EntityKey::new(self.target_catalog_id, self.target_id)
    }

    /// Returns the composite identity of the policy entity.
    #[must_use]
    pub const fn policy_key(&self) -> EntityKey {
        EntityKey::new(self.policy_catalog_id, self.policy_id)
    }
}
