//! # trellis-core
//!
//! Core abstractions for the Trellis hierarchical metadata catalog.
//!
//! This crate provides the foundational types shared by every Trellis
//! component:
//!
//! - **Identifiers**: Store-generated entity identifiers and composite keys
//! - **Entity Model**: The universal versioned entity and its builder
//! - **Access Control**: Privileges and grant records
//! - **Policies**: Policy kinds and policy mapping records
//! - **Secrets**: Principal credential records and hashing helpers
//! - **Tasks**: Lease state parsed from task entity properties
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `trellis-core` is the **only** crate allowed to define shared primitives.
//! The persistence port (`trellis-store`) and the engines (`trellis-catalog`)
//! both build on the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod entity;
pub mod error;
pub mod grant;
pub mod id;
pub mod observability;
pub mod policy;
pub mod secrets;
pub mod task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::entity::{Entity, EntityBuilder, EntitySubType, EntityType};
    pub use crate::error::{Error, Result};
    pub use crate::grant::{GrantRecord, Privilege};
    pub use crate::id::{EntityId, EntityKey};
    pub use crate::policy::{PolicyKind, PolicyMappingRecord};
    pub use crate::secrets::PrincipalSecrets;
    pub use crate::task::{AsyncTaskKind, TaskLeaseState};
}

// Re-export key types at crate root for ergonomics
pub use entity::{Entity, EntityBuilder, EntitySubType, EntityType};
pub use error::{Error, Result};
pub use grant::{GrantRecord, Privilege};
pub use id::{EntityId, EntityKey};
pub use observability::{init_logging, LogFormat};
pub use policy::{PolicyKind, PolicyMappingRecord};
pub use secrets::PrincipalSecrets;
pub use task::{AsyncTaskKind, TaskLeaseState};
