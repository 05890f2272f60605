//! Path re-resolution.
//!
//! Callers hand each operation the ancestor chain they resolved earlier
//! (catalog, then namespaces, outermost first). Because that chain may have
//! changed since — an ancestor dropped, renamed, or re-parented by a
//! concurrent caller — every operation re-validates it inside its own
//! transaction before touching anything. Resolution failure is an expected
//! outcome (`Ok(None)`), not an error: the caller maps it to the
//! path-unresolved or entity-unresolved status of the operation at hand.

use serde::{Deserialize, Serialize};

use trellis_core::{Entity, EntityId, EntityKey, EntitySubType, EntityType, Result};
use trellis_store::StoreTransaction;

/// A lightweight reference to an entity the caller has already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Catalog id of the referenced entity.
    pub catalog_id: EntityId,
    /// Id of the referenced entity.
    pub id: EntityId,
    /// Parent id the caller observed.
    pub parent_id: EntityId,
    /// Kind of the referenced entity.
    pub entity_type: EntityType,
    /// Sub-kind of the referenced entity.
    pub sub_type: EntitySubType,
    /// Name the caller observed.
    pub name: String,
}

impl EntityRef {
    /// Returns the composite identity of the referenced entity.
    #[must_use]
    pub const fn key(&self) -> EntityKey {
        EntityKey::new(self.catalog_id, self.id)
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        Self {
            catalog_id: entity.catalog_id,
            id: entity.id,
            parent_id: entity.parent_id,
            entity_type: entity.entity_type,
            sub_type: entity.sub_type,
            name: entity.name.clone(),
        }
    }
}

/// Where a successfully re-resolved path lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Id of the catalog the path descends into, or `None` for the
    /// top level.
    pub catalog_id: Option<EntityId>,
    /// Id of the innermost path entity; the parent for lookups and
    /// creations under this path.
    pub parent_id: EntityId,
}

impl ResolvedPath {
    /// The top level: no catalog, parented by the root container.
    #[must_use]
    pub const fn top_level() -> Self {
        Self {
            catalog_id: None,
            parent_id: EntityId::ROOT,
        }
    }

    /// Returns the catalog id, or [`EntityId::NULL`] at the top level.
    #[must_use]
    pub fn catalog_id_or_null(&self) -> EntityId {
        self.catalog_id.unwrap_or(EntityId::NULL)
    }
}

/// Re-resolves an ancestor path.
///
/// Each ancestor must still exist, be active, hang off the previous path
/// element, and carry the name the caller observed. `None` (or an empty
/// slice) is the top level.
///
/// # Errors
///
/// Returns an error only when the persistence port fails; a path that no
/// longer resolves is `Ok(None)`.
pub async fn resolve_path(
    txn: &dyn StoreTransaction,
    catalog_path: Option<&[EntityRef]>,
) -> Result<Option<ResolvedPath>> {
    resolve_path_with_entities(txn, catalog_path, None, &[]).await
}

/// Re-resolves an ancestor path plus the other entities an operation
/// depends on.
///
/// The optional `leaf` and every `top_level` entity must still exist and be
/// active; unlike ancestors their names are not compared, because a
/// concurrent rename of the leaf is detected by the operation's own version
/// check (and reported as a concurrency conflict, not a resolution
/// failure).
///
/// # Errors
///
/// Returns an error only when the persistence port fails.
pub async fn resolve_path_with_entities(
    txn: &dyn StoreTransaction,
    catalog_path: Option<&[EntityRef]>,
    leaf: Option<&EntityRef>,
    top_level: &[EntityRef],
) -> Result<Option<ResolvedPath>> {
    let mut resolved = ResolvedPath::top_level();

    if let Some(path) = catalog_path.filter(|p| !p.is_empty()) {
        let mut expected_parent = EntityId::ROOT;
        for (depth, ancestor) in path.iter().enumerate() {
            let Some(found) = txn
                .lookup_entity(ancestor.catalog_id, ancestor.id, ancestor.entity_type)
                .await?
            else {
                return Ok(None);
            };
            if found.parent_id != expected_parent || found.name != ancestor.name {
                return Ok(None);
            }
            if depth == 0 {
                resolved.catalog_id = Some(found.id);
            }
            expected_parent = found.id;
        }
        resolved.parent_id = expected_parent;
    }

    for reference in leaf.into_iter().chain(top_level) {
        let found = txn
            .lookup_entity(reference.catalog_id, reference.id, reference.entity_type)
            .await?;
        if found.is_none() {
            return Ok(None);
        }
    }

    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_store::{InMemoryStore, MetaStore};

    fn entity(
        catalog_id: i64,
        id: i64,
        entity_type: EntityType,
        parent_id: i64,
        name: &str,
    ) -> Entity {
        Entity::new(
            EntityId::new(catalog_id),
            EntityId::new(id),
            entity_type,
            EntitySubType::Null,
            EntityId::new(parent_id),
            name,
        )
    }

    async fn seeded_store() -> (InMemoryStore, Entity, Entity) {
        let store = InMemoryStore::new();
        let catalog = entity(0, 10, EntityType::Catalog, 0, "sales");
        let namespace = entity(10, 11, EntityType::Namespace, 10, "q1");
        let mut txn = store.begin_read_write().await.unwrap();
        txn.write_entity(&catalog, false, None).await.unwrap();
        txn.write_entity(&namespace, false, None).await.unwrap();
        txn.commit().await.unwrap();
        (store, catalog, namespace)
    }

    #[tokio::test]
    async fn empty_path_resolves_to_top_level() {
        let store = InMemoryStore::new();
        let txn = store.begin_read().await.unwrap();
        let resolved = resolve_path(txn.as_ref(), None).await.unwrap().unwrap();
        assert_eq!(resolved, ResolvedPath::top_level());
        assert_eq!(resolved.catalog_id_or_null(), EntityId::NULL);
    }

    #[tokio::test]
    async fn chain_resolves_to_innermost_parent() {
        let (store, catalog, namespace) = seeded_store().await;
        let txn = store.begin_read().await.unwrap();
        let path = [EntityRef::from(&catalog), EntityRef::from(&namespace)];
        let resolved = resolve_path(txn.as_ref(), Some(&path))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.catalog_id, Some(catalog.id));
        assert_eq!(resolved.parent_id, namespace.id);
    }

    #[tokio::test]
    async fn renamed_ancestor_fails_resolution() {
        let (store, catalog, namespace) = seeded_store().await;
        let mut stale = EntityRef::from(&catalog);
        stale.name = "old-name".into();
        let txn = store.begin_read().await.unwrap();
        let path = [stale, EntityRef::from(&namespace)];
        assert!(resolve_path(txn.as_ref(), Some(&path)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_leaf_fails_resolution() {
        let (store, catalog, namespace) = seeded_store().await;
        let mut ghost = EntityRef::from(&namespace);
        ghost.id = EntityId::new(999);
        let txn = store.begin_read().await.unwrap();
        let path = [EntityRef::from(&catalog)];
        let resolved =
            resolve_path_with_entities(txn.as_ref(), Some(&path), Some(&ghost), &[]).await;
        assert!(resolved.unwrap().is_none());
    }
}
