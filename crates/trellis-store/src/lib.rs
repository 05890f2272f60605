//! # trellis-store
//!
//! The persistence port of the Trellis metadata catalog, and its in-memory
//! transactional backend.
//!
//! The port is two traits: [`MetaStore`] hands out transactions, and
//! [`StoreTransaction`] is the unit of work every engine operation runs
//! inside — conditional entity reads/writes/deletes, grant-record and
//! policy-mapping storage, principal-secret storage, id generation, and the
//! commit/rollback boundary. Nothing outside a transaction touches storage.
//!
//! ## Design Principles
//!
//! - **Conditional writes**: every entity write may carry the
//!   expected-previous snapshot; a version mismatch fails the write instead
//!   of losing an update
//! - **All-or-nothing**: a transaction publishes everything on commit or
//!   nothing at all
//! - **Testability**: the in-memory backend is snapshot-isolated and
//!   single-writer, making transactional behavior directly observable in
//!   tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod integration;
pub mod memory;
pub mod page;
pub mod port;

pub use integration::{AccessConfig, IntegrationError, StaticStorageIntegration, StorageIntegration};
pub use memory::InMemoryStore;
pub use page::{Page, PageToken};
pub use port::{
    EntityFilter, EntityNameRecord, EntityVersions, MetaStore, PolicyMappingWriteError,
    StoreTransaction,
};
