//! Test event stores — mock `EventStore` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use rampart_core::aggregate::AggregateId;
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::event_store::EventStore;

/// One recorded `save_events` call.
pub type SavedBatch = (AggregateId, i64, Vec<StoredEvent>);

/// An event store that serves a fixed history and records every
/// `save_events` call without checking versions.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    history: Vec<StoredEvent>,
    saved: Mutex<Vec<SavedBatch>>,
}

impl RecordingEventStore {
    /// Creates a store that returns `history` from every history read.
    #[must_use]
    pub fn new(history: Vec<StoredEvent>) -> Self {
        Self {
            history,
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Returns every recorded save, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_batches(&self) -> Vec<SavedBatch> {
        self.saved.lock().unwrap().clone()
    }

    /// Returns every saved event, flattened.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_events(&self) -> Vec<StoredEvent> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, _, events)| events.clone())
            .collect()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn save_events(
        &self,
        aggregate_id: &AggregateId,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        self.saved
            .lock()
            .unwrap()
            .push((aggregate_id.clone(), expected_version, events.to_vec()));
        Ok(())
    }

    async fn get_event_history(
        &self,
        _aggregate_id: &AggregateId,
        _aggregate_type: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self
            .history
            .iter()
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect())
    }

    async fn get_last_event_version(&self, _aggregate_id: &AggregateId) -> Result<i64, DomainError> {
        Ok(self.history.last().map_or(0, |e| e.version))
    }
}

/// An event store with no streams that silently accepts saves. Useful for
/// creation commands and "aggregate not found" paths.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn save_events(
        &self,
        _aggregate_id: &AggregateId,
        _events: &[StoredEvent],
        _expected_version: i64,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn get_event_history(
        &self,
        aggregate_id: &AggregateId,
        _aggregate_type: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        if from_version > 1 {
            return Err(DomainError::AggregateNotFound(aggregate_id.clone()));
        }
        Ok(Vec::new())
    }

    async fn get_last_event_version(&self, _aggregate_id: &AggregateId) -> Result<i64, DomainError> {
        Ok(0)
    }
}

/// An event store that fails every call with an infrastructure error.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn save_events(
        &self,
        _aggregate_id: &AggregateId,
        _events: &[StoredEvent],
        _expected_version: i64,
    ) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn get_event_history(
        &self,
        _aggregate_id: &AggregateId,
        _aggregate_type: &str,
        _from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn get_last_event_version(&self, _aggregate_id: &AggregateId) -> Result<i64, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
