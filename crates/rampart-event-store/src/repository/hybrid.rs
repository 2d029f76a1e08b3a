//! Hybrid repository: event log plus a materialized state record.
//!
//! The event log is the system of record and the concurrency gate. The
//! state record is a read-optimized cache of the latest state: a state
//! write that fails after the events committed is logged and repaired on
//! the next load, which replays whatever tail of the log the record lags
//! behind.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::aggregate::{AggregateId, AggregateRoot};
use rampart_core::clock::Clock;
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::event_store::EventStore;
use rampart_core::repository::Repository;
use rampart_core::state::{StateRecord, StateStore};
use tracing::{debug, info, instrument, warn};

/// Outcome of comparing an aggregate's state record with its event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// The checked aggregate.
    pub aggregate_id: AggregateId,
    /// Last version in the event log.
    pub event_version: i64,
    /// Version of the state record, if one exists.
    pub state_version: Option<i64>,
    /// Whether the record's hash matches its state.
    pub hash_valid: bool,
    /// Whether the record's state equals a full replay of the log.
    pub state_matches_replay: bool,
}

impl ConsistencyReport {
    /// Returns `true` if the record is current, intact and equal to replay.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.state_version == Some(self.event_version) && self.hash_valid && self.state_matches_replay
    }
}

/// Writes events and a state record; reads the record and catches up from
/// the log.
pub struct HybridRepository<A> {
    events: Arc<dyn EventStore>,
    states: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: AggregateRoot + 'static> HybridRepository<A> {
    /// Creates a repository over an event store and a state store.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, states: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events,
            states,
            clock,
            _aggregate: PhantomData,
        }
    }

    /// Rebuilds the state record from a full replay of the event log.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the log is empty, and
    /// `DomainError::ConcurrencyConflict` if the record changed while it was
    /// being rebuilt.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn sync_state_from_events(&self, id: &AggregateId) -> Result<StateRecord, DomainError> {
        let replayed = self.replay(id).await?;
        let record = StateRecord::capture(&replayed, self.clock.now())?;
        let stored_version = self.states.load_state(id).await?.map_or(0, |r| r.version);
        self.states.save_state(record.clone(), stored_version).await?;
        info!(
            from_version = stored_version,
            to_version = record.version,
            "rebuilt state record from events"
        );
        Ok(record)
    }

    /// Compares the state record with a full replay of the event log.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the log is empty.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn validate_state_consistency(
        &self,
        id: &AggregateId,
    ) -> Result<ConsistencyReport, DomainError> {
        let replayed = self.replay(id).await?;
        let replayed_state = serde_json::to_value(replayed.state())?;
        let record = self.states.load_state(id).await?;

        let report = ConsistencyReport {
            aggregate_id: id.clone(),
            event_version: replayed.current_version(),
            state_version: record.as_ref().map(|r| r.version),
            hash_valid: record.as_ref().is_some_and(StateRecord::hash_matches),
            state_matches_replay: record.as_ref().is_some_and(|r| r.state == replayed_state),
        };
        if !report.is_consistent() {
            warn!(
                event_version = report.event_version,
                state_version = ?report.state_version,
                hash_valid = report.hash_valid,
                "state record drifted from event log"
            );
        }
        Ok(report)
    }

    async fn replay(&self, id: &AggregateId) -> Result<A, DomainError> {
        let history = self
            .events
            .get_event_history(id, A::AGGREGATE_TYPE, 1)
            .await?;
        if history.is_empty() {
            return Err(DomainError::AggregateNotFound(id.clone()));
        }
        let mut aggregate = A::empty(id.clone());
        aggregate.load_from_stored(&history)?;
        Ok(aggregate)
    }

    async fn usable_record(&self, id: &AggregateId) -> Result<Option<A>, DomainError> {
        let Some(record) = self.states.load_state(id).await? else {
            return Ok(None);
        };
        if record.aggregate_type != A::AGGREGATE_TYPE || !record.hash_matches() {
            warn!(aggregate_id = %id, "discarding unusable state record, replaying log");
            return Ok(None);
        }
        match record.restore::<A>() {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(e) => {
                warn!(aggregate_id = %id, error = %e, "state record does not decode, replaying log");
                Ok(None)
            }
        }
    }

    async fn write_state(&self, aggregate: &A) -> Result<(), DomainError> {
        let record = StateRecord::capture(aggregate, self.clock.now())?;
        let stored_version = self
            .states
            .load_state(aggregate.aggregate_id())
            .await?
            .map_or(0, |r| r.version);
        if stored_version >= record.version {
            return Ok(());
        }
        self.states.save_state(record, stored_version).await
    }
}

#[async_trait]
impl<A: AggregateRoot + 'static> Repository<A> for HybridRepository<A> {
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
        self.events
            .save_events(aggregate.aggregate_id(), &events, expected_version)
            .await?;

        if let Err(e) = self.write_state(aggregate).await {
            warn!(
                version = aggregate.current_version(),
                error = %e,
                "state record write failed after events committed; will catch up on load"
            );
        }
        Ok(events)
    }

    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    async fn get_by_id(&self, id: &AggregateId) -> Result<A, DomainError> {
        let (mut aggregate, from_version) = match self.usable_record(id).await? {
            Some(aggregate) => {
                let next = aggregate.current_version() + 1;
                (aggregate, next)
            }
            None => (A::empty(id.clone()), 1),
        };

        let tail = self
            .events
            .get_event_history(id, A::AGGREGATE_TYPE, from_version)
            .await?;
        if aggregate.current_version() == 0 && tail.is_empty() {
            return Err(DomainError::AggregateNotFound(id.clone()));
        }
        if from_version > 1 && !tail.is_empty() {
            debug!(lag = tail.len(), "state record lagged the event log");
        }
        aggregate.load_from_stored(&tail)?;
        Ok(aggregate)
    }

    async fn get_version(&self, id: &AggregateId) -> Result<i64, DomainError> {
        super::stream_version::<A>(self.events.as_ref(), id).await
    }

    async fn exists(&self, id: &AggregateId) -> Result<bool, DomainError> {
        Ok(self.get_version(id).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::aggregate::EventContext;
    use rampart_test_support::{Cargo, FixedClock};

    use super::*;
    use crate::in_memory::{InMemoryEventStore, InMemoryStateStore};

    struct BrokenStateStore;

    #[async_trait]
    impl StateStore for BrokenStateStore {
        async fn load_state(&self, _id: &AggregateId) -> Result<Option<StateRecord>, DomainError> {
            Ok(None)
        }

        async fn save_state(&self, _record: StateRecord, _expected: i64) -> Result<(), DomainError> {
            Err(DomainError::Infrastructure("state table unavailable".into()))
        }
    }

    fn id() -> AggregateId {
        AggregateId::from("cargo-1")
    }

    #[tokio::test]
    async fn test_drift_is_reported_and_repaired() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(FixedClock::default());
        let repo = HybridRepository::<Cargo>::new(events, states.clone(), clock.clone());
        let ctx = EventContext::new(clock.as_ref());
        let mut cargo = Cargo::create(id(), "Oslo", "Lagos", &ctx).unwrap();
        cargo.load_shipment(40, &ctx).unwrap();
        repo.save(&cargo, 0).await.unwrap();
        assert!(repo.validate_state_consistency(&id()).await.unwrap().is_consistent());

        // Act: someone edits the record behind the repository's back.
        let mut record = states.load_state(&id()).await.unwrap().unwrap();
        record.state["loaded_kg"] = serde_json::json!(1);
        record.state_hash = rampart_core::state::state_hash(&record.state).unwrap();
        states.overwrite(record).unwrap();
        let drifted = repo.validate_state_consistency(&id()).await.unwrap();
        repo.sync_state_from_events(&id()).await.unwrap();
        let repaired = repo.validate_state_consistency(&id()).await.unwrap();

        // Assert
        assert!(drifted.hash_valid);
        assert!(!drifted.state_matches_replay);
        assert!(!drifted.is_consistent());
        assert!(repaired.is_consistent());
        assert_eq!(repaired.event_version, 2);
    }

    #[tokio::test]
    async fn test_failed_state_write_keeps_events_and_load_catches_up() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(FixedClock::default());
        let repo = HybridRepository::<Cargo>::new(events.clone(), Arc::new(BrokenStateStore), clock.clone());
        let ctx = EventContext::new(clock.as_ref());
        let mut cargo = Cargo::create(id(), "Oslo", "Lagos", &ctx).unwrap();
        cargo.load_shipment(15, &ctx).unwrap();

        // Act
        let saved = repo.save(&cargo, 0).await.unwrap();
        let loaded = repo.get_by_id(&id()).await.unwrap();

        // Assert
        assert_eq!(saved.len(), 2);
        assert_eq!(events.get_last_event_version(&id()).await.unwrap(), 2);
        assert_eq!(loaded.state().loaded_kg, 15);
        assert_eq!(loaded.current_version(), 2);
    }

    #[tokio::test]
    async fn test_lagging_record_is_caught_up_from_log() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(FixedClock::default());
        let repo = HybridRepository::<Cargo>::new(events.clone(), states.clone(), clock.clone());
        let ctx = EventContext::new(clock.as_ref());
        let mut cargo = Cargo::create(id(), "Oslo", "Lagos", &ctx).unwrap();
        repo.save(&cargo, 0).await.unwrap();
        cargo.clear_changes();

        // Act: append directly to the log, bypassing the state record.
        cargo.load_shipment(25, &ctx).unwrap();
        events
            .save_events(&id(), &cargo.stored_changes().unwrap(), 1)
            .await
            .unwrap();
        let loaded = repo.get_by_id(&id()).await.unwrap();

        // Assert
        assert_eq!(states.load_state(&id()).await.unwrap().unwrap().version, 1);
        assert_eq!(loaded.current_version(), 2);
        assert_eq!(loaded.state().loaded_kg, 25);
    }

    #[tokio::test]
    async fn test_stream_of_other_type_is_invisible() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::new());
        let foreign: Vec<StoredEvent> = rampart_test_support::cargo_history("shared-1", 2)
            .into_iter()
            .map(|e| StoredEvent {
                aggregate_type: "Barge".into(),
                ..e
            })
            .collect();
        events
            .save_events(&AggregateId::from("shared-1"), &foreign, 0)
            .await
            .unwrap();
        let repo = HybridRepository::<Cargo>::new(
            events,
            Arc::new(InMemoryStateStore::new()),
            Arc::new(FixedClock::default()),
        );

        // Act
        let version = repo.get_version(&AggregateId::from("shared-1")).await.unwrap();
        let exists = repo.exists(&AggregateId::from("shared-1")).await.unwrap();
        let loaded = repo.get_by_id(&AggregateId::from("shared-1")).await;

        // Assert
        assert_eq!(version, 0);
        assert!(!exists);
        assert!(matches!(loaded, Err(DomainError::AggregateNotFound(_))));
    }
}
