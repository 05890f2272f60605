//! The typed outcome taxonomy of catalog operations.
//!
//! Every public operation returns `Result<T, CatalogError>`. The error
//! variants are deliberate, caller-visible outcomes, not exceptions:
//!
//! - **Not-found** (entity, grant, mapping): a normal outcome the caller
//!   handles
//! - **Conflict** (name collision, version mismatch, policy-kind collision,
//!   non-empty container): the caller should re-resolve and retry with
//!   fresh state
//! - **Concurrency-retryable** ([`TaskLeaseContention`]): the one outcome
//!   where retrying the same call unchanged is the right response
//! - **Invariant violations** surface through
//!   [`Core`](CatalogError::Core) wrapping
//!   [`Error::Invariant`](trellis_core::Error::Invariant): corruption or
//!   programming bugs, never expected at runtime
//!
//! Whatever the variant, the enclosing transaction has been rolled back;
//! partial writes are never committed.
//!
//! [`TaskLeaseContention`]: CatalogError::TaskLeaseContention

use trellis_core::{EntitySubType, PolicyKind};

/// The result type of catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Caller-visible outcome of a failed catalog operation.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The entity does not exist (or is dropped).
    #[error("entity not found")]
    EntityNotFound,

    /// An active sibling of the same kind already holds the name.
    #[error("an entity with the same name already exists")]
    EntityAlreadyExists {
        /// Sub-type of the entity holding the name.
        sub_type: EntitySubType,
    },

    /// The claimed ancestor path no longer resolves.
    #[error("catalog path cannot be resolved")]
    CatalogPathUnresolved,

    /// One of the entities referenced by the call no longer resolves.
    #[error("entity cannot be resolved")]
    EntityUnresolved,

    /// The stored entity version differs from the version the caller
    /// observed; reload and retry with fresh state.
    #[error("target entity was concurrently modified")]
    ConcurrentModification,

    /// The entity is a protected system entity and cannot be renamed.
    #[error("entity cannot be renamed")]
    EntityCannotBeRenamed,

    /// The entity is a protected system entity and cannot be dropped.
    #[error("entity cannot be dropped")]
    EntityUndroppable,

    /// The namespace (or catalog) still contains namespaces.
    #[error("namespace is not empty")]
    NamespaceNotEmpty,

    /// The catalog still contains catalog roles beyond its admin role.
    #[error("catalog is not empty")]
    CatalogNotEmpty,

    /// The grant record to revoke is already absent.
    #[error("grant record not found")]
    GrantNotFound,

    /// The policy mapping to detach is already absent.
    #[error("policy mapping not found")]
    PolicyMappingNotFound,

    /// A mapping of the same policy kind already exists on the target.
    #[error("a policy mapping of kind {kind:?} already exists on the target")]
    PolicyMappingOfSameKindExists {
        /// Kind of the conflicting mapping.
        kind: PolicyKind,
    },

    /// The policy still has active mappings and the drop is not
    /// cleanup-driven.
    #[error("policy has active mappings")]
    PolicyHasMappings,

    /// The storage integration refused to vend sub-scoped credentials.
    #[error("sub-scoped credentials error: {message}")]
    SubscopedCreds {
        /// Description from the integration.
        message: String,
    },

    /// Another executor raced for a lease in the same page; retry the whole
    /// batch.
    #[error("task lease contention: {message}")]
    TaskLeaseContention {
        /// Description of the lost race.
        message: String,
    },

    /// An error outside the expected taxonomy was signaled.
    #[error("unexpected error: {message}")]
    Unexpected {
        /// Description of the error.
        message: String,
    },

    /// Infrastructure failure or structural invariant violation.
    #[error(transparent)]
    Core(#[from] trellis_core::Error),
}

impl CatalogError {
    /// Returns true if retrying the same call unchanged may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TaskLeaseContention { .. })
    }
}
