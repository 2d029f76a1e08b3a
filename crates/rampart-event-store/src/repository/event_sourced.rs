//! Event-sourced repository: the event log is the only store.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::aggregate::{AggregateId, AggregateRoot};
use rampart_core::clock::Clock;
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::event_store::{EventStore, SnapshotStore};
use rampart_core::repository::Repository;
use rampart_core::snapshot::{Snapshot, SnapshotPolicy};
use tracing::{debug, instrument, warn};

/// Loads aggregates by replaying their stream, optionally starting from the
/// latest snapshot.
pub struct EventSourcedRepository<A> {
    events: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    policy: SnapshotPolicy,
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: AggregateRoot> EventSourcedRepository<A> {
    /// Creates a repository that replays full history on every load.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events,
            snapshots: None,
            policy: SnapshotPolicy::Never,
            clock,
            _aggregate: PhantomData,
        }
    }

    /// Loads from snapshots and takes new ones according to `policy`.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>, policy: SnapshotPolicy) -> Self {
        self.snapshots = Some(snapshots);
        self.policy = policy;
        self
    }

    async fn load_snapshot(&self, id: &AggregateId) -> Result<Option<A>, DomainError> {
        let Some(store) = &self.snapshots else {
            return Ok(None);
        };
        let Some(snapshot) = store.get_snapshot(id).await? else {
            return Ok(None);
        };
        match snapshot.restore::<A>() {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(e) => {
                warn!(
                    aggregate_id = %id,
                    version = snapshot.version,
                    error = %e,
                    "ignoring unreadable snapshot, replaying full history"
                );
                Ok(None)
            }
        }
    }

    async fn take_snapshot(&self, aggregate: &A) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let snapshot = match Snapshot::capture(aggregate, self.clock.now()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(aggregate_id = %aggregate.aggregate_id(), error = %e, "snapshot capture failed");
                return;
            }
        };
        let version = snapshot.version;
        match store.save_snapshot(snapshot).await {
            Ok(()) => debug!(aggregate_id = %aggregate.aggregate_id(), version, "took snapshot"),
            Err(e) => warn!(
                aggregate_id = %aggregate.aggregate_id(),
                version,
                error = %e,
                "snapshot write failed"
            ),
        }
    }
}

#[async_trait]
impl<A: AggregateRoot + 'static> Repository<A> for EventSourcedRepository<A> {
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

        let saved_version = events.last().map_or(expected_version, |e| e.version);
        if self.policy.should_snapshot(expected_version, saved_version) {
            self.take_snapshot(aggregate).await;
        }
        Ok(events)
    }

    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    async fn get_by_id(&self, id: &AggregateId) -> Result<A, DomainError> {
        let (mut aggregate, from_version) = match self.load_snapshot(id).await? {
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
        aggregate.load_from_stored(&tail)?;
        debug!(
            version = aggregate.current_version(),
            replayed = tail.len(),
            "loaded aggregate"
        );
        Ok(aggregate)
    }

    async fn get_version(&self, id: &AggregateId) -> Result<i64, DomainError> {
        super::stream_version::<A>(self.events.as_ref(), id).await
    }

    async fn exists(&self, id: &AggregateId) -> Result<bool, DomainError> {
        Ok(self.get_version(id).await? > 0)
    }
}
