//! Task lease state.
//!
//! Asynchronous work items are plain entities of kind
//! [`EntityType::Task`](crate::entity::EntityType::Task); their lease state
//! lives in the entity's `properties` under fixed keys. A lease is a
//! time-bounded claim by one executor, renewed by re-stamping the
//! last-attempt fields through the optimistic-concurrency update path — an
//! executor that dies simply stops renewing and another executor reclaims
//! the task once the lease age exceeds the configured timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::entity::Entity;

/// Property key holding the task kind code.
pub const TASK_KIND_PROPERTY: &str = "task-kind";

/// Property key holding the serialized task payload.
pub const TASK_DATA_PROPERTY: &str = "data";

/// Property key holding the id of the executor that last leased the task.
pub const LAST_ATTEMPT_EXECUTOR_PROPERTY: &str = "executor-id";

/// Property key holding the start of the last lease (milliseconds since
/// epoch).
pub const LAST_ATTEMPT_START_PROPERTY: &str = "last-attempt-start";

/// Property key holding the number of lease attempts so far.
pub const ATTEMPT_COUNT_PROPERTY: &str = "attempt-count";

/// The closed set of asynchronous task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncTaskKind {
    /// Cleanup of a dropped entity's residual state.
    EntityCleanup,
}

impl AsyncTaskKind {
    /// Stable numeric code stored in the task's properties.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::EntityCleanup => 1,
        }
    }

    /// Resolves a numeric code back to a kind; unknown codes fail closed.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::EntityCleanup),
            _ => None,
        }
    }
}

/// The lease fields of one task entity, parsed from its properties.
///
/// Parsing is tolerant: missing or malformed fields read as "never leased",
/// which makes the task immediately leasable rather than stuck.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskLeaseState {
    /// Executor holding the most recent lease, if any.
    pub executor_id: Option<String>,
    /// When the most recent lease was taken.
    pub last_attempt_start: Option<DateTime<Utc>>,
    /// Number of lease attempts so far.
    pub attempt_count: u32,
}

impl TaskLeaseState {
    /// Parses the lease state off a task entity.
    #[must_use]
    pub fn parse(task: &Entity) -> Self {
        let executor_id = task
            .properties
            .get(LAST_ATTEMPT_EXECUTOR_PROPERTY)
            .filter(|id| !id.is_empty())
            .cloned();
        let last_attempt_start = task
            .properties
            .get(LAST_ATTEMPT_START_PROPERTY)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);
        let attempt_count = task
            .properties
            .get(ATTEMPT_COUNT_PROPERTY)
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(0);
        Self {
            executor_id,
            last_attempt_start,
            attempt_count,
        }
    }

    /// Returns true if the task may be leased at `now`: it has never been
    /// leased, or its lease age exceeds `lease_timeout`.
    #[must_use]
    pub fn is_leasable(&self, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
        if self.executor_id.is_none() {
            return true;
        }
        let Some(start) = self.last_attempt_start else {
            return true;
        };
        let timeout =
            chrono::Duration::from_std(lease_timeout).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(start) > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntitySubType, EntityType};
    use crate::id::EntityId;

    fn task_entity() -> Entity {
        Entity::new(
            EntityId::NULL,
            EntityId::new(99),
            EntityType::Task,
            EntitySubType::Null,
            EntityId::ROOT,
            "entity-cleanup-7",
        )
    }

    #[test]
    fn unleased_task_is_leasable() {
        let state = TaskLeaseState::parse(&task_entity());
        assert!(state.executor_id.is_none());
        assert!(state.is_leasable(Utc::now(), Duration::from_secs(300)));
    }

    #[test]
    fn fresh_lease_blocks_other_executors() {
        let mut task = task_entity();
        task.properties
            .insert(LAST_ATTEMPT_EXECUTOR_PROPERTY.into(), "executor-a".into());
        task.properties.insert(
            LAST_ATTEMPT_START_PROPERTY.into(),
            Utc::now().timestamp_millis().to_string(),
        );
        task.properties.insert(ATTEMPT_COUNT_PROPERTY.into(), "1".into());

        let state = TaskLeaseState::parse(&task);
        assert_eq!(state.attempt_count, 1);
        assert!(!state.is_leasable(Utc::now(), Duration::from_secs(300)));
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let mut task = task_entity();
        let long_ago = Utc::now() - chrono::Duration::seconds(600);
        task.properties
            .insert(LAST_ATTEMPT_EXECUTOR_PROPERTY.into(), "executor-a".into());
        task.properties.insert(
            LAST_ATTEMPT_START_PROPERTY.into(),
            long_ago.timestamp_millis().to_string(),
        );

        let state = TaskLeaseState::parse(&task);
        assert!(state.is_leasable(Utc::now(), Duration::from_secs(300)));
    }

    #[test]
    fn malformed_lease_fields_read_as_never_leased() {
        let mut task = task_entity();
        task.properties
            .insert(LAST_ATTEMPT_START_PROPERTY.into(), "garbage".into());
        task.properties
            .insert(ATTEMPT_COUNT_PROPERTY.into(), "also garbage".into());

        let state = TaskLeaseState::parse(&task);
        assert!(state.last_attempt_start.is_none());
        assert_eq!(state.attempt_count, 0);
        assert!(state.is_leasable(Utc::now(), Duration::from_secs(300)));
    }
}
