//! Domain event abstractions.
//!
//! An event exists in two shapes: [`EventMessage`] carries a typed payload
//! and is what aggregates raise and fold; [`StoredEvent`] carries the same
//! metadata with a JSON payload and is what stores persist and buses publish.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateId;
use crate::error::DomainError;

/// Who or what caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// Issuer identifier (a user id, a service name, ...).
    pub id: String,
    /// Issuer kind (`"user"`, `"system"`, ...).
    pub kind: String,
}

impl Issuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }

    /// Creates a user issuer.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, "user")
    }
}

/// Trait implemented by each aggregate's event enum.
pub trait EventPayload:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Returns the event type name (used for routing and subscriptions).
    fn event_type(&self) -> &'static str;
}

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Position in the aggregate stream, starting at 1.
    pub version: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Who caused the event.
    pub issuer: Option<Issuer>,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Option<Uuid>,
}

/// An immutable, typed fact about one aggregate instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage<P> {
    metadata: EventMetadata,
    payload: P,
}

impl<P: EventPayload> EventMessage<P> {
    /// Creates an event from its metadata and payload.
    #[must_use]
    pub fn new(metadata: EventMetadata, payload: P) -> Self {
        Self { metadata, payload }
    }

    /// Returns the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Returns the typed payload.
    #[must_use]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Returns the stream position of this event.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.metadata.version
    }

    /// Returns the event type name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }

    /// Returns the aggregate this event belongs to.
    #[must_use]
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.metadata.aggregate_id
    }

    /// Serializes the event into its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredEvent, DomainError> {
        let meta = &self.metadata;
        Ok(StoredEvent {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id.clone(),
            aggregate_type: meta.aggregate_type.clone(),
            event_type: meta.event_type.clone(),
            version: meta.version,
            payload: serde_json::to_value(&self.payload)?,
            occurred_at: meta.occurred_at,
            issuer: meta.issuer.clone(),
            correlation_id: meta.correlation_id,
        })
    }
}

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Position within the aggregate stream.
    pub version: i64,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Who caused the event.
    pub issuer: Option<Issuer>,
    /// Correlation ID for tracing.
    pub correlation_id: Option<Uuid>,
}

impl StoredEvent {
    /// Returns a copy of this event's metadata.
    #[must_use]
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            version: self.version,
            occurred_at: self.occurred_at,
            issuer: self.issuer.clone(),
            correlation_id: self.correlation_id,
        }
    }

    /// Decodes the payload into a typed event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not decode
    /// into `P`, or decodes into a variant whose type name differs from the
    /// stored `event_type`.
    pub fn decode<P: EventPayload>(&self) -> Result<EventMessage<P>, DomainError> {
        let payload: P = serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::Serialization(format!(
                "event {} ({}) deserialization failed: {e}",
                self.event_id, self.event_type
            ))
        })?;
        if payload.event_type() != self.event_type {
            return Err(DomainError::Serialization(format!(
                "event {} is stored as {} but decodes as {}",
                self.event_id,
                self.event_type,
                payload.event_type()
            )));
        }
        Ok(EventMessage::new(self.metadata(), payload))
    }
}
