//! Success payloads of catalog operations.

use serde::{Deserialize, Serialize};

use trellis_core::{Entity, EntityId, GrantRecord, PolicyMappingRecord, PrincipalSecrets};

use crate::resolver::EntityRef;

/// Result of creating (or idempotently re-creating) a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCatalogOutput {
    /// The catalog entity.
    pub catalog: Entity,
    /// The catalog's admin role, provisioned alongside it.
    pub admin_role: Entity,
}

/// Result of creating (or idempotently re-creating) a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrincipalOutput {
    /// The principal entity, with its client id recorded in internal
    /// properties.
    pub principal: Entity,
    /// The principal's credentials; carries the plaintext secret only when
    /// freshly generated.
    pub secrets: PrincipalSecrets,
}

/// Result of a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropOutput {
    /// Id of the cleanup task scheduled in the same transaction as the
    /// drop, when cleanup was requested.
    pub cleanup_task_id: Option<EntityId>,
}

/// One entity plus the ancestor path it lives under, for bulk updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWithPath {
    /// Ancestor path of the entity; `None` for top-level entities.
    pub catalog_path: Option<Vec<EntityRef>>,
    /// The entity carrying the caller's changes and observed version.
    pub entity: Entity,
}

/// Grants loaded for one entity, plus the version to cache them under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadGrantsOutput {
    /// The entity's `grant_records_version` at load time.
    pub grants_version: i32,
    /// Every matching grant record.
    pub grant_records: Vec<GrantRecord>,
    /// The distinct entities on the other side of those grants. Entities
    /// that no longer resolve are skipped: grant deletion and entity
    /// deletion are not atomic with each other.
    pub entities: Vec<Entity>,
}

/// Policy mappings loaded for one target, with the policies dereferenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPolicyMappingsOutput {
    /// The mapping records.
    pub mapping_records: Vec<PolicyMappingRecord>,
    /// The distinct policy entities the records point to; policies that no
    /// longer resolve are skipped.
    pub policy_entities: Vec<Entity>,
}

/// An entity resolved together with its grants, for cached access checks.
///
/// On an incremental refresh, `entity` and `grant_records` are `None` when
/// the corresponding version counter has not moved — the caller's cached
/// copy is still valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntityOutput {
    /// The entity content; `None` when unchanged since the caller's
    /// version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
    /// The entity's current `grant_records_version`.
    pub grants_version: i32,
    /// Grant records on the entity (both sides for grantees); `None` when
    /// unchanged since the caller's version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_records: Option<Vec<GrantRecord>>,
}
