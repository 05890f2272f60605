//! Privileges and grant records.
//!
//! A grant record ties a *securable* (any entity privileges can be granted
//! on) to a *grantee* (an entity whose kind satisfies
//! [`EntityType::is_grantee`](crate::entity::EntityType::is_grantee)) under a
//! single privilege. Grant records are stored and versioned independently of
//! the entities they reference; the grant engine bumps each endpoint's
//! `grant_records_version` whenever a record is added or removed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{EntityId, EntityKey};

/// The closed set of grantable privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privilege {
    /// Manage access at the service level (granted on the root container).
    ServiceManageAccess,
    /// Manage access control within a catalog.
    CatalogManageAccess,
    /// Manage metadata within a catalog.
    CatalogManageMetadata,
    /// Use a catalog role (granted to principal roles).
    CatalogRoleUsage,
    /// Use a principal role (granted to principals).
    PrincipalRoleUsage,
    /// Full metadata control over a namespace.
    NamespaceFullMetadata,
    /// Read table data.
    TableReadData,
    /// Write table data.
    TableWriteData,
}

impl Privilege {
    /// Stable numeric code used by the persistence port.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ServiceManageAccess => 1,
            Self::CatalogManageAccess => 2,
            Self::CatalogManageMetadata => 3,
            Self::CatalogRoleUsage => 4,
            Self::PrincipalRoleUsage => 5,
            Self::NamespaceFullMetadata => 6,
            Self::TableReadData => 7,
            Self::TableWriteData => 8,
        }
    }

    /// Resolves a numeric code back to a privilege; unknown codes fail
    /// closed.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::ServiceManageAccess),
            2 => Some(Self::CatalogManageAccess),
            3 => Some(Self::CatalogManageMetadata),
            4 => Some(Self::CatalogRoleUsage),
            5 => Some(Self::PrincipalRoleUsage),
            6 => Some(Self::NamespaceFullMetadata),
            7 => Some(Self::TableReadData),
            8 => Some(Self::TableWriteData),
            _ => None,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ServiceManageAccess => "SERVICE_MANAGE_ACCESS",
            Self::CatalogManageAccess => "CATALOG_MANAGE_ACCESS",
            Self::CatalogManageMetadata => "CATALOG_MANAGE_METADATA",
            Self::CatalogRoleUsage => "CATALOG_ROLE_USAGE",
            Self::PrincipalRoleUsage => "PRINCIPAL_ROLE_USAGE",
            Self::NamespaceFullMetadata => "NAMESPACE_FULL_METADATA",
            Self::TableReadData => "TABLE_READ_DATA",
            Self::TableWriteData => "TABLE_WRITE_DATA",
        };
        f.write_str(label)
    }
}

/// A single privilege granted on a securable to a grantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRecord {
    /// Catalog id of the securable endpoint.
    pub securable_catalog_id: EntityId,
    /// Id of the securable endpoint.
    pub securable_id: EntityId,
    /// Catalog id of the grantee endpoint.
    pub grantee_catalog_id: EntityId,
    /// Id of the grantee endpoint.
    pub grantee_id: EntityId,
    /// The granted privilege.
    pub privilege: Privilege,
}

impl GrantRecord {
    /// Creates a grant record between the two endpoints.
    #[must_use]
    pub const fn new(securable: EntityKey, grantee: EntityKey, privilege: Privilege) -> Self {
        Self {
            securable_catalog_id: securable.catalog_id,
            securable_id: securable.entity_id,
            grantee_catalog_id: grantee.catalog_id,
            grantee_id: grantee.entity_id,
            privilege,
        }
    }

    /// Returns the composite identity of the securable endpoint.
    #[must_use]
    pub const fn securable_key(&self) -> EntityKey {
        EntityKey::new(self.securable_catalog_id, self.securable_id)
    }

    /// Returns the composite identity of the grantee endpoint.
    #[must_use]
    pub const fn grantee_key(&self) -> EntityKey {
        EntityKey::new(self.grantee_catalog_id, self.grantee_id)
    }
}

impl fmt::Display for GrantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} to {}",
            self.privilege,
            self.securable_key(),
            self.grantee_key()
        )
    }
}
