//! # trellis-catalog
//!
//! The transactional engines of the Trellis metadata catalog:
//!
//! - **Entity Lifecycle**: create, rename, update, and soft-drop versioned
//!   entities with optimistic concurrency and name-uniqueness enforcement
//! - **Grants & Privileges**: grant records between securables and grantees,
//!   with a per-entity grant version decoupled from the content version
//! - **Policy Mappings**: typed policy attachments with an
//!   at-most-one-per-kind invariant
//! - **Bootstrap & Provisioning**: idempotent creation of the root
//!   container, root principal, service-admin role, and per-catalog admin
//!   roles with their default grants
//! - **Task Leasing**: a lease-based work queue for asynchronous cleanup,
//!   built on the same entity primitives
//!
//! Every public operation opens one transaction on the persistence port,
//! re-resolves the claimed ancestor path, performs its conditional writes,
//! and commits; any failure rolls the whole transaction back. Cross-entity
//! consistency (a grant record plus the version counters of both endpoints)
//! is built from single-entity conditional writes — partial application is
//! tolerated because a stale version always fails closed on next use.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod manager;
pub mod resolver;
pub mod results;

pub use config::{CatalogConfig, TaskQueueConfig};
pub use error::{CatalogError, CatalogResult};
pub use manager::CatalogManager;
pub use resolver::{EntityRef, ResolvedPath};
pub use results::{
    CreateCatalogOutput, CreatePrincipalOutput, DropOutput, EntityWithPath, LoadGrantsOutput,
    LoadPolicyMappingsOutput, ResolvedEntityOutput,
};
