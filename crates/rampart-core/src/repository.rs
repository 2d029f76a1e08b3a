//! Aggregate repository abstraction.

use async_trait::async_trait;

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::error::DomainError;
use crate::event::StoredEvent;

/// Persistence facade presented to command handlers.
///
/// Implementations may be event-sourced, state-based or hybrid; all of them
/// honour the same contract.
#[async_trait]
pub trait Repository<A: AggregateRoot>: Send + Sync {
    /// Persists the aggregate's uncommitted changes and returns them in
    /// stored form. Does not clear the changes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another writer has moved
    /// the aggregate past `expected_version` since it was loaded.
    async fn save(&self, aggregate: &A, expected_version: i64)
    -> Result<Vec<StoredEvent>, DomainError>;

    /// Loads an aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for an unknown id.
    async fn get_by_id(&self, id: &AggregateId) -> Result<A, DomainError>;

    /// Returns the persisted version of the aggregate, or 0 if unknown.
    async fn get_version(&self, id: &AggregateId) -> Result<i64, DomainError>;

    /// Returns whether the aggregate has been persisted. Absence is
    /// `Ok(false)`, never an error.
    async fn exists(&self, id: &AggregateId) -> Result<bool, DomainError>;
}
