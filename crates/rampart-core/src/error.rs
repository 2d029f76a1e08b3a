//! Domain error types.

use std::time::Duration;

use thiserror::Error;

use crate::aggregate::AggregateId;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A command or query failed local validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: AggregateId,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// No handler is registered for the command type.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// No handler is registered for the query type.
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    /// A handler is already registered for the command or query type.
    #[error("handler already registered for {0}")]
    HandlerAlreadyRegistered(String),

    /// An event was applied out of sequence.
    #[error("invalid version on aggregate {aggregate_id}: expected {expected}, got {actual}")]
    InvalidVersion {
        /// The aggregate receiving the event.
        aggregate_id: AggregateId,
        /// The version the aggregate expected next.
        expected: i64,
        /// The version carried by the event.
        actual: i64,
    },

    /// A projection failed to process an event.
    #[error("projection {projection} failed: {message}")]
    ProjectionFailed {
        /// The projection name.
        projection: String,
        /// Failure description.
        message: String,
    },

    /// Requested history precedes the oldest retained event.
    #[error("history of aggregate {aggregate_id} is compacted before version {first_available}")]
    HistoryCompacted {
        /// The compacted aggregate.
        aggregate_id: AggregateId,
        /// The oldest version still stored.
        first_available: i64,
    },

    /// The event bus is not running.
    #[error("event bus is stopped")]
    BusStopped,

    /// A dispatch exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Payload or state (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors a caller may resolve by reloading and retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
