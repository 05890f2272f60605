//! Identifiers for catalog entities.
//!
//! Unlike random identifiers, entity ids are allocated by the persistence
//! port (`generate_id`) so that a backing store can hand out ids from its own
//! sequence. The well-known id `0` is reserved: it is both the "no containing
//! catalog" marker ([`EntityId::NULL`]) and the id of the root container
//! ([`EntityId::ROOT`]), which every top-level entity uses as its parent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A store-allocated identifier for a catalog entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// The "no containing catalog" marker, used as the catalog id of
    /// top-level entities (catalogs, principals, principal roles, tasks).
    pub const NULL: Self = Self(0);

    /// The id of the root container, and the parent id of every top-level
    /// entity.
    pub const ROOT: Self = Self(0);

    /// Creates an id from a raw value.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<i64>().map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid entity id '{s}': {e}"),
        })
    }
}

/// The globally unique composite identity of an entity: the id of its
/// containing catalog ([`EntityId::NULL`] for top-level entities) plus its
/// own id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    /// Id of the containing catalog, or [`EntityId::NULL`].
    pub catalog_id: EntityId,
    /// Id of the entity itself.
    pub entity_id: EntityId,
}

impl EntityKey {
    /// Creates a composite key.
    #[must_use]
    pub const fn new(catalog_id: EntityId, entity_id: EntityId) -> Self {
        Self {
            catalog_id,
            entity_id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.catalog_id, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_roundtrip() {
        let id = EntityId::new(42);
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_id_returns_error() {
        let result: Result<EntityId> = "not-a-number".parse();
        assert!(result.is_err());
    }

    #[test]
    fn null_and_root_share_the_reserved_id() {
        assert_eq!(EntityId::NULL.as_i64(), 0);
        assert_eq!(EntityId::ROOT.as_i64(), 0);
    }

    #[test]
    fn keys_order_by_catalog_then_id() {
        let a = EntityKey::new(EntityId::new(1), EntityId::new(9));
        let b = EntityKey::new(EntityId::new(2), EntityId::new(1));
        assert!(a < b);
    }
}
