//! In-memory event, snapshot and state stores.
//!
//! Intended for tests and single-process deployments. Each aggregate stream
//! sits behind its own mutex, so writers to different aggregates never
//! contend; the outer map lock is only held to find or create a stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use rampart_core::aggregate::AggregateId;
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::event_store::{EventStore, SnapshotStore, validate_batch, validate_compaction};
use rampart_core::snapshot::Snapshot;
use rampart_core::state::{StateRecord, StateStore};
use tracing::debug;

fn poisoned<T>(_: PoisonError<T>) -> DomainError {
    DomainError::Infrastructure("in-memory store lock poisoned".into())
}

#[derive(Debug, Default)]
struct Stream {
    aggregate_type: String,
    events: Vec<StoredEvent>,
    /// Last version removed by compaction; 0 if never compacted.
    compacted_through: i64,
}

impl Stream {
    fn last_version(&self) -> i64 {
        self.events
            .last()
            .map_or(self.compacted_through, |e| e.version)
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty() && self.compacted_through == 0
    }
}

/// In-memory append-only event store with snapshot support.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Arc<Mutex<Stream>>>>,
    snapshots: RwLock<HashMap<AggregateId, Snapshot>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, aggregate_id: &AggregateId) -> Result<Option<Arc<Mutex<Stream>>>, DomainError> {
        let streams = self.streams.read().map_err(poisoned)?;
        Ok(streams.get(aggregate_id).cloned())
    }

    fn find_or_create(&self, aggregate_id: &AggregateId) -> Result<Arc<Mutex<Stream>>, DomainError> {
        if let Some(stream) = self.find(aggregate_id)? {
            return Ok(stream);
        }
        let mut streams = self.streams.write().map_err(poisoned)?;
        Ok(Arc::clone(streams.entry(aggregate_id.clone()).or_default()))
    }

    fn latest_snapshot(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>, DomainError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(snapshots.get(aggregate_id).cloned())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_events(
        &self,
        aggregate_id: &AggregateId,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(aggregate_id, events, expected_version)?;

        let stream = self.find_or_create(aggregate_id)?;
        let mut stream = stream.lock().map_err(poisoned)?;

        let actual = stream.last_version();
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected: expected_version,
                actual,
            });
        }

        let aggregate_type = &events[0].aggregate_type;
        if stream.is_empty() {
            stream.aggregate_type.clone_from(aggregate_type);
        } else if &stream.aggregate_type != aggregate_type {
            return Err(DomainError::Validation(format!(
                "stream {aggregate_id} holds {} events, attempted append of {aggregate_type}",
                stream.aggregate_type
            )));
        }

        stream.events.extend_from_slice(events);
        debug!(
            %aggregate_id,
            expected_version,
            new_version = stream.last_version(),
            "appended events"
        );
        Ok(())
    }

    async fn get_event_history(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let not_found = || {
            if from_version <= 1 {
                Ok(Vec::new())
            } else {
                Err(DomainError::AggregateNotFound(aggregate_id.clone()))
            }
        };

        let Some(stream) = self.find(aggregate_id)? else {
            return not_found();
        };
        let stream = stream.lock().map_err(poisoned)?;
        if stream.is_empty() {
            return not_found();
        }
        if stream.aggregate_type != aggregate_type {
            return Err(DomainError::AggregateNotFound(aggregate_id.clone()));
        }

        let from_version = from_version.max(1);
        if from_version <= stream.compacted_through {
            return Err(DomainError::HistoryCompacted {
                aggregate_id: aggregate_id.clone(),
                first_available: stream.compacted_through + 1,
            });
        }
        Ok(stream
            .events
            .iter()
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect())
    }

    async fn get_last_event_version(&self, aggregate_id: &AggregateId) -> Result<i64, DomainError> {
        let Some(stream) = self.find(aggregate_id)? else {
            return Ok(0);
        };
        let stream = stream.lock().map_err(poisoned)?;
        Ok(stream.last_version())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.write().map_err(poisoned)?;
        let newer = snapshots
            .get(&snapshot.aggregate_id)
            .is_none_or(|existing| existing.version <= snapshot.version);
        if newer {
            debug!(
                aggregate_id = %snapshot.aggregate_id,
                version = snapshot.version,
                "stored snapshot"
            );
            snapshots.insert(snapshot.aggregate_id.clone(), snapshot);
        }
        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Snapshot>, DomainError> {
        self.latest_snapshot(aggregate_id)
    }

    async fn compact_events(
        &self,
        aggregate_id: &AggregateId,
        keep_from_version: i64,
    ) -> Result<usize, DomainError> {
        let snapshot = self.latest_snapshot(aggregate_id)?;
        validate_compaction(aggregate_id, snapshot.as_ref(), keep_from_version)?;

        let Some(stream) = self.find(aggregate_id)? else {
            return Err(DomainError::AggregateNotFound(aggregate_id.clone()));
        };
        let mut stream = stream.lock().map_err(poisoned)?;
        let before = stream.events.len();
        stream.events.retain(|e| e.version >= keep_from_version);
        stream.compacted_through = stream.compacted_through.max(keep_from_version - 1);
        let removed = before - stream.events.len();

        debug!(%aggregate_id, keep_from_version, removed, "compacted stream");
        Ok(removed)
    }
}

/// In-memory keyed store of aggregate state records.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<AggregateId, StateRecord>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a record without a version check. Test hook for simulating
    /// drift between the event log and the state table.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the lock is poisoned.
    pub fn overwrite(&self, record: StateRecord) -> Result<(), DomainError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.aggregate_id.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_state(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<StateRecord>, DomainError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(aggregate_id).cloned())
    }

    async fn save_state(
        &self,
        record: StateRecord,
        expected_version: i64,
    ) -> Result<(), DomainError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let actual = records.get(&record.aggregate_id).map_or(0, |r| r.version);
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: record.aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        records.insert(record.aggregate_id.clone(), record);
        Ok(())
    }
}
