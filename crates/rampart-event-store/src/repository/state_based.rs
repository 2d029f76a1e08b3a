//! State-based repository: only the latest state is stored.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::aggregate::{AggregateId, AggregateRoot};
use rampart_core::clock::Clock;
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::repository::Repository;
use rampart_core::state::{StateRecord, StateStore};
use tracing::instrument;

/// Persists one state record per aggregate. Events are still returned from
/// `save` for publication but are not stored.
pub struct StateBasedRepository<A> {
    states: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: AggregateRoot> StateBasedRepository<A> {
    /// Creates a repository over `states`.
    #[must_use]
    pub fn new(states: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            states,
            clock,
            _aggregate: PhantomData,
        }
    }

    async fn load_record(&self, id: &AggregateId) -> Result<Option<StateRecord>, DomainError> {
        Ok(self
            .states
            .load_state(id)
            .await?
            .filter(|record| record.aggregate_type == A::AGGREGATE_TYPE))
    }
}

#[async_trait]
impl<A: AggregateRoot + 'static> Repository<A> for StateBasedRepository<A> {
    #[instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %aggregate.aggregate_id()),
        err
    )]
    async fn save(&self, aggregate: &A, expected_version: i64) -> Result<Vec<StoredEvent>, DomainError> {
        let events = aggregate.stored_changes()?;
        if events.is_empty() {
            return Ok(events);
        }
        let record = StateRecord::capture(aggregate, self.clock.now())?;
        self.states.save_state(record, expected_version).await?;
        Ok(events)
    }

    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    async fn get_by_id(&self, id: &AggregateId) -> Result<A, DomainError> {
        let record = self
            .load_record(id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound(id.clone()))?;
        if !record.hash_matches() {
            return Err(DomainError::Infrastructure(format!(
                "state record of {id} does not match its hash"
            )));
        }
        record.restore()
    }

    async fn get_version(&self, id: &AggregateId) -> Result<i64, DomainError> {
        Ok(self.load_record(id).await?.map_or(0, |record| record.version))
    }

    async fn exists(&self, id: &AggregateId) -> Result<bool, DomainError> {
        Ok(self.load_record(id).await?.is_some())
    }
}
