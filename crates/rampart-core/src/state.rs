//! Current-state persistence for state-based and hybrid repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::error::DomainError;

/// The current state of one aggregate, stored without an event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Aggregate identifier.
    pub aggregate_id: AggregateId,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Version of the aggregate this state reflects.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// SHA-256 of the serialized state, hex encoded.
    pub state_hash: String,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Captures the state of `aggregate` at its current version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded.
    pub fn capture<A: AggregateRoot>(
        aggregate: &A,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let state = serde_json::to_value(aggregate.state())?;
        Ok(Self {
            aggregate_id: aggregate.aggregate_id().clone(),
            aggregate_type: A::AGGREGATE_TYPE.to_owned(),
            version: aggregate.current_version(),
            state_hash: state_hash(&state)?,
            state,
            updated_at,
        })
    }

    /// Rebuilds the aggregate this record describes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the record belongs to another
    /// aggregate type or its state does not decode.
    pub fn restore<A: AggregateRoot>(&self) -> Result<A, DomainError> {
        if self.aggregate_type != A::AGGREGATE_TYPE {
            return Err(DomainError::Serialization(format!(
                "state of {} is a {}, not a {}",
                self.aggregate_id,
                self.aggregate_type,
                A::AGGREGATE_TYPE
            )));
        }
        let state: A::State = serde_json::from_value(self.state.clone())?;
        Ok(A::restore(self.aggregate_id.clone(), self.version, state))
    }

    /// Returns `true` if `state_hash` matches the stored state.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        state_hash(&self.state).is_ok_and(|hash| hash == self.state_hash)
    }
}

/// Hashes a serialized state. Object keys serialize in sorted order, so
/// equal states always hash equally.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if the value cannot be encoded.
pub fn state_hash(state: &serde_json::Value) -> Result<String, DomainError> {
    let bytes = serde_json::to_vec(state)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Keyed store of current aggregate state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state record of an aggregate, if any.
    async fn load_state(&self, aggregate_id: &AggregateId)
    -> Result<Option<StateRecord>, DomainError>;

    /// Writes a state record if the stored version (0 when absent) equals
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` when the versions differ.
    async fn save_state(
        &self,
        record: StateRecord,
        expected_version: i64,
    ) -> Result<(), DomainError>;
}
