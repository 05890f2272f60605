//! Sub-scoped credential lookup.

use trellis_core::entity::STORAGE_CONFIG_PROPERTY;
use trellis_core::{EntityId, EntityType, Error};
use trellis_store::{AccessConfig, StoreTransaction as _};

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;

impl CatalogManager {
    /// Vends credentials for an entity, sub-scoped to the supplied
    /// locations, through the entity's storage integration.
    ///
    /// At least one read or write location is required. Integration
    /// failures are reported as [`CatalogError::SubscopedCreds`].
    #[tracing::instrument(skip_all, fields(entity = %id))]
    pub async fn get_subscoped_creds_for_entity(
        &self,
        catalog_id: EntityId,
        id: EntityId,
        entity_type: EntityType,
        allow_list_operation: bool,
        read_locations: &[String],
        write_locations: &[String],
    ) -> CatalogResult<AccessConfig> {
        if read_locations.is_empty() && write_locations.is_empty() {
            return Err(
                Error::invariant("at least one allowed location is required").into(),
            );
        }

        let txn = self.store.begin_read().await?;
        let outcome = async {
            let Some(entity) = txn.lookup_entity(catalog_id, id, entity_type).await? else {
                return Err(CatalogError::EntityNotFound);
            };

            let integration = txn
                .load_storage_integration(&entity)
                .await?
                .ok_or_else(|| Error::invariant("entity has no storage integration"))?;
            let storage_config = entity
                .internal_properties
                .get(STORAGE_CONFIG_PROPERTY)
                .ok_or_else(|| Error::invariant("entity has no storage configuration"))?;

            integration
                .subscoped_creds(
                    storage_config,
                    allow_list_operation,
                    read_locations,
                    write_locations,
                )
                .await
                .map_err(|error| CatalogError::SubscopedCreds {
                    message: error.message,
                })
        }
        .await;
        self.finish(txn, outcome).await
    }
}
