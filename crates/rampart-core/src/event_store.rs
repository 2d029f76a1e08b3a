//! Event store abstraction.

use async_trait::async_trait;

use crate::aggregate::AggregateId;
use crate::error::DomainError;
use crate::event::StoredEvent;
use crate::snapshot::Snapshot;

/// Append-only, per-aggregate event log with optimistic concurrency.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to the aggregate stream if its last stored version
    /// equals `expected_version`. The whole batch commits or none of it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` when the stream has moved,
    /// and `DomainError::InvalidVersion` when the batch is not numbered
    /// `expected_version + 1, expected_version + 2, ...`.
    async fn save_events(
        &self,
        aggregate_id: &AggregateId,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError>;

    /// Returns events with `version >= from_version` in increasing order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for an unknown stream when
    /// `from_version > 1` or when the stream holds another aggregate type,
    /// and `DomainError::HistoryCompacted` when the requested range was
    /// compacted away.
    async fn get_event_history(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Returns the last stored version, or 0 for an unknown stream.
    async fn get_last_event_version(&self, aggregate_id: &AggregateId) -> Result<i64, DomainError>;
}

/// Optional snapshot storage and compaction.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a snapshot, replacing any older snapshot at the same version.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError>;

    /// Returns the latest snapshot of the aggregate, if any.
    async fn get_snapshot(&self, aggregate_id: &AggregateId)
    -> Result<Option<Snapshot>, DomainError>;

    /// Discards events older than `keep_from_version` and returns how many
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the latest snapshot covers
    /// every discarded event (`snapshot.version >= keep_from_version - 1`)
    /// and `keep_from_version` does not pass the snapshot's version.
    async fn compact_events(
        &self,
        aggregate_id: &AggregateId,
        keep_from_version: i64,
    ) -> Result<usize, DomainError>;
}

/// Checks that a batch targets `aggregate_id` and continues the stream from
/// `expected_version` without gaps.
///
/// # Errors
///
/// Returns `DomainError::Validation` for events of another aggregate and
/// `DomainError::InvalidVersion` for misnumbered events.
pub fn validate_batch(
    aggregate_id: &AggregateId,
    events: &[StoredEvent],
    expected_version: i64,
) -> Result<(), DomainError> {
    let mut next = expected_version + 1;
    for event in events {
        if &event.aggregate_id != aggregate_id {
            return Err(DomainError::Validation(format!(
                "batch for aggregate {aggregate_id} contains event {} of aggregate {}",
                event.event_id, event.aggregate_id
            )));
        }
        if event.version != next {
            return Err(DomainError::InvalidVersion {
                aggregate_id: aggregate_id.clone(),
                expected: next,
                actual: event.version,
            });
        }
        next += 1;
    }
    if let Some(first) = events.first() {
        if events.iter().any(|e| e.aggregate_type != first.aggregate_type) {
            return Err(DomainError::Validation(format!(
                "batch for aggregate {aggregate_id} mixes aggregate types"
            )));
        }
    }
    Ok(())
}

/// Checks a compaction request against the latest snapshot.
///
/// # Errors
///
/// Returns `DomainError::Validation` if compaction would discard events the
/// snapshot does not cover, or events at or after the snapshot's version.
pub fn validate_compaction(
    aggregate_id: &AggregateId,
    snapshot: Option<&Snapshot>,
    keep_from_version: i64,
) -> Result<(), DomainError> {
    let Some(snapshot) = snapshot else {
        return Err(DomainError::Validation(format!(
            "cannot compact aggregate {aggregate_id} without a snapshot"
        )));
    };
    if keep_from_version > snapshot.version || keep_from_version < 1 {
        return Err(DomainError::Validation(format!(
            "cannot compact aggregate {aggregate_id} from version {keep_from_version}: \
             snapshot is at version {}",
            snapshot.version
        )));
    }
    Ok(())
}
