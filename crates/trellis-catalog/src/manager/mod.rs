//! The catalog manager.
//!
//! [`CatalogManager`] is the single entry point of the transactional core.
//! Its operations are split across focused modules — entity lifecycle,
//! resolved-entity reads, grants, policy mappings, provisioning, task
//! leasing, credential vending — but share one discipline: every public
//! operation opens exactly one transaction, performs path re-resolution and
//! conditional writes inside it, and commits on success or rolls back on
//! any failure.

mod creds;
mod grants;
mod lifecycle;
mod policies;
mod provisioning;
mod resolved;
mod tasks;

use std::sync::Arc;

use chrono::Utc;

use trellis_core::{Entity, Error};
use trellis_store::{MetaStore, StoreTransaction};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, CatalogResult};

/// The transactional core of the metadata catalog.
pub struct CatalogManager {
    store: Arc<dyn MetaStore>,
    config: CatalogConfig,
}

impl CatalogManager {
    /// Creates a manager over the given persistence port with default
    /// configuration.
    #[must_use]
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self::with_config(store, CatalogConfig::default())
    }

    /// Creates a manager with explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn MetaStore>, config: CatalogConfig) -> Self {
        Self { store, config }
    }

    /// Runs a fallible outcome through the commit/rollback boundary.
    ///
    /// On success the transaction commits; on failure it rolls back and the
    /// outcome passes through unchanged. Rollback failures are logged, not
    /// surfaced — the original failure is the one the caller needs.
    pub(crate) async fn finish<T>(
        &self,
        txn: Box<dyn StoreTransaction>,
        outcome: CatalogResult<T>,
    ) -> CatalogResult<T> {
        match outcome {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = txn.rollback().await {
                    tracing::warn!(error = %rollback_error, "rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Persists a brand-new entity: validates it, stamps timestamps and
    /// initial versions, and writes it with its name slot claimed.
    pub(crate) async fn persist_new_entity(
        &self,
        txn: &mut dyn StoreTransaction,
        entity: Entity,
    ) -> CatalogResult<Entity> {
        if entity.name.is_empty() {
            return Err(Error::invariant("entity name must not be empty").into());
        }
        if entity.sub_type == trellis_core::EntitySubType::Any {
            return Err(Error::invariant("the Any sub-type is a filter, not storable").into());
        }
        let now = Utc::now();
        let entity = entity
            .to_builder()
            .entity_version(1)
            .grant_records_version(1)
            .create_timestamp(now)
            .last_update_timestamp(now)
            .drop_timestamp(None)
            .build();
        txn.write_entity(&entity, true, None).await?;
        Ok(entity)
    }

    /// Persists a changed entity: bumps its version, stamps the update
    /// time, and writes conditionally against the original snapshot.
    pub(crate) async fn persist_entity_after_change(
        &self,
        txn: &mut dyn StoreTransaction,
        entity: Entity,
        name_or_parent_changed: bool,
        original: &Entity,
    ) -> CatalogResult<Entity> {
        let updated = entity
            .to_builder()
            .entity_version(original.entity_version + 1)
            .last_update_timestamp(Utc::now())
            .build();
        txn.write_entity(&updated, name_or_parent_changed, Some(original))
            .await?;
        Ok(updated)
    }

    /// Maps a resolution miss to the path-unresolved outcome.
    pub(crate) fn path_unresolved<T>(resolved: Option<T>) -> CatalogResult<T> {
        resolved.ok_or(CatalogError::CatalogPathUnresolved)
    }

    /// Maps a resolution miss to the entity-unresolved outcome.
    pub(crate) fn entity_unresolved<T>(resolved: Option<T>) -> CatalogResult<T> {
        resolved.ok_or(CatalogError::EntityUnresolved)
    }
}
