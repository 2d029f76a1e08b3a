//! Aggregate snapshots.
//!
//! A snapshot is the serialized state of an aggregate at a given version.
//! Loading from a snapshot and replaying only the tail of the stream must
//! produce the same state as a full replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::error::DomainError;

/// A point-in-time snapshot of an aggregate's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// The stream version folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Captures the state of `aggregate` at its current version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded.
    pub fn capture<A: AggregateRoot>(
        aggregate: &A,
        taken_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            aggregate_id: aggregate.aggregate_id().clone(),
            aggregate_type: A::AGGREGATE_TYPE.to_owned(),
            version: aggregate.current_version(),
            state: serde_json::to_value(aggregate.state())?,
            taken_at,
        })
    }

    /// Rebuilds the aggregate captured by this snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the snapshot belongs to
    /// another aggregate type or its state does not decode.
    pub fn restore<A: AggregateRoot>(&self) -> Result<A, DomainError> {
        if self.aggregate_type != A::AGGREGATE_TYPE {
            return Err(DomainError::Serialization(format!(
                "snapshot of {} is a {}, not a {}",
                self.aggregate_id,
                self.aggregate_type,
                A::AGGREGATE_TYPE
            )));
        }
        let state: A::State = serde_json::from_value(self.state.clone())?;
        Ok(A::restore(self.aggregate_id.clone(), self.version, state))
    }
}

/// When to take snapshots on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Never take snapshots.
    Never,
    /// Take a snapshot whenever a save crosses a multiple of the interval.
    EveryNEvents(u32),
}

impl SnapshotPolicy {
    /// Returns `true` if a save moving the stream from `from` to `to`
    /// crosses a snapshot boundary.
    #[must_use]
    pub fn should_snapshot(self, from: i64, to: i64) -> bool {
        match self {
            Self::Never | Self::EveryNEvents(0) => false,
            Self::EveryNEvents(n) => {
                let n = i64::from(n);
                to > from && to / n > from / n
            }
        }
    }
}
