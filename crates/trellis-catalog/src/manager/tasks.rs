//! The task leasing queue.
//!
//! Tasks are plain entities; a lease is taken by stamping the executor and
//! attempt fields through the optimistic-concurrency update path. Leasing
//! is currently all-or-nothing per page: if any task in the page was leased
//! by a racing executor first, the whole transaction rolls back and the
//! caller retries the batch.
//!
//! TODO: lease tasks individually instead of all-or-nothing per page, so
//! two executors scanning the same page don't force each other to retry.

use chrono::Utc;

use trellis_core::task::{
    ATTEMPT_COUNT_PROPERTY, LAST_ATTEMPT_EXECUTOR_PROPERTY, LAST_ATTEMPT_START_PROPERTY,
};
use trellis_core::{Entity, EntityId, EntityType, TaskLeaseState};
use trellis_store::{Page, PageToken, StoreTransaction as _};

use crate::error::{CatalogError, CatalogResult};
use crate::manager::CatalogManager;

impl CatalogManager {
    /// Leases a page of available tasks for `executor_id`.
    ///
    /// A task is available when it has never been leased or when its lease
    /// age exceeds the configured timeout. Every leased task gets its
    /// executor, start time, and attempt count stamped; if any stamp loses
    /// a race the whole page is released and the call fails with the
    /// retryable [`CatalogError::TaskLeaseContention`].
    #[tracing::instrument(skip_all, fields(executor = executor_id))]
    pub async fn load_tasks(
        &self,
        executor_id: &str,
        page_token: &PageToken,
    ) -> CatalogResult<Page<Entity>> {
        let mut txn = self.store.begin_read_write().await?;
        let now = Utc::now();
        let lease_timeout = self.config.task_queue.lease_timeout;

        let outcome = async {
            let available = txn
                .list_entities(
                    EntityId::NULL,
                    EntityId::ROOT,
                    EntityType::Task,
                    &move |task: &Entity| {
                        TaskLeaseState::parse(task).is_leasable(now, lease_timeout)
                    },
                    page_token,
                )
                .await?;

            let mut leased = Vec::with_capacity(available.items.len());
            for task in &available.items {
                let state = TaskLeaseState::parse(task);
                let mut properties = task.properties.clone();
                properties.insert(
                    LAST_ATTEMPT_EXECUTOR_PROPERTY.to_owned(),
                    executor_id.to_owned(),
                );
                properties.insert(
                    LAST_ATTEMPT_START_PROPERTY.to_owned(),
                    now.timestamp_millis().to_string(),
                );
                properties.insert(
                    ATTEMPT_COUNT_PROPERTY.to_owned(),
                    (state.attempt_count + 1).to_string(),
                );
                let stamped = task.to_builder().properties(properties).build();

                match self
                    .update_entity_properties_in_txn(txn.as_mut(), None, &stamped)
                    .await
                {
                    Ok(updated) => leased.push(updated),
                    Err(error) => {
                        tracing::debug!(task = %task.id, %error, "lost lease race");
                        return Err(CatalogError::TaskLeaseContention {
                            message: format!("failed to lease task {}: {error}", task.id),
                        });
                    }
                }
            }

            Ok(Page {
                items: leased,
                next_token: available.next_token,
            })
        }
        .await;
        self.finish(txn, outcome).await
    }
}
