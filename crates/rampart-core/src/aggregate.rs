//! Aggregate root abstraction.
//!
//! An aggregate's state is derived solely by folding its ordered event
//! stream. [`BaseAggregate`] carries the identity and versioning bookkeeping
//! every aggregate shares; [`AggregateRoot`] adds the aggregate-specific
//! mutator and provides the versioned apply/replay/raise operations on top.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{EventMessage, EventMetadata, EventPayload, Issuer, StoredEvent};

/// Identifier of an aggregate instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for AggregateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for AggregateId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ambient data stamped onto every event raised by a business method.
#[derive(Clone)]
pub struct EventContext<'a> {
    clock: &'a dyn Clock,
    issuer: Option<Issuer>,
    correlation_id: Option<Uuid>,
}

impl<'a> EventContext<'a> {
    /// Creates a context that timestamps events with `clock`.
    #[must_use]
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            issuer: None,
            correlation_id: None,
        }
    }

    /// Sets the issuer recorded on raised events.
    #[must_use]
    pub fn with_issuer(mut self, issuer: Option<Issuer>) -> Self {
        self.issuer = issuer;
        self
    }

    /// Sets the correlation ID recorded on raised events.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> Option<&Issuer> {
        self.issuer.as_ref()
    }

    /// Returns the correlation ID.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }
}

impl fmt::Debug for EventContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("issuer", &self.issuer)
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

/// Identity and version bookkeeping shared by all aggregates.
#[derive(Debug, Clone)]
pub struct BaseAggregate<E> {
    id: AggregateId,
    /// Version at load time (0 for new aggregates).
    original_version: i64,
    /// Number of events folded into the aggregate.
    current_version: i64,
    /// Events applied since the last `clear_changes`.
    changes: Vec<EventMessage<E>>,
}

impl<E: EventPayload> BaseAggregate<E> {
    /// Creates bookkeeping for a new aggregate at version 0.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        Self::at_version(id, 0)
    }

    /// Creates bookkeeping for an aggregate restored at `version`.
    #[must_use]
    pub fn at_version(id: AggregateId, version: i64) -> Self {
        Self {
            id,
            original_version: version,
            current_version: version,
            changes: Vec::new(),
        }
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Returns the version the aggregate had when it was loaded.
    #[must_use]
    pub fn original_version(&self) -> i64 {
        self.original_version
    }

    /// Returns the version after all applied events.
    #[must_use]
    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    /// Returns the uncommitted events in application order.
    #[must_use]
    pub fn changes(&self) -> &[EventMessage<E>] {
        &self.changes
    }

    fn check_next(&self, event: &EventMessage<E>) -> Result<(), DomainError> {
        if event.aggregate_id() != &self.id {
            return Err(DomainError::Validation(format!(
                "event {} belongs to aggregate {}, not {}",
                event.metadata().event_id,
                event.aggregate_id(),
                self.id
            )));
        }
        let expected = self.current_version + 1;
        if event.version() != expected {
            return Err(DomainError::InvalidVersion {
                aggregate_id: self.id.clone(),
                expected,
                actual: event.version(),
            });
        }
        Ok(())
    }

    fn record(&mut self, event: EventMessage<E>) {
        self.current_version += 1;
        self.changes.push(event);
    }

    fn advance(&mut self) {
        self.current_version += 1;
        self.original_version = self.current_version;
    }

    fn clear(&mut self) {
        self.changes.clear();
        self.original_version = self.current_version;
    }
}

/// Trait for aggregate roots that reconstitute from event history.
///
/// Implementors supply the bookkeeping accessors, a serializable state and
/// the `apply` mutator; versioning is handled by the provided methods.
pub trait AggregateRoot: Sized + Send + Sync {
    /// Aggregate type name, recorded on every event.
    const AGGREGATE_TYPE: &'static str;

    /// The event enum this aggregate produces and consumes.
    type Event: EventPayload;

    /// Serializable state, used for snapshots and state-based persistence.
    type State: Clone + Default + Serialize + DeserializeOwned + Send + Sync;

    /// Assembles an aggregate from bookkeeping and state.
    fn from_parts(base: BaseAggregate<Self::Event>, state: Self::State) -> Self;

    /// Returns the shared bookkeeping.
    fn base(&self) -> &BaseAggregate<Self::Event>;

    /// Returns the shared bookkeeping mutably.
    fn base_mut(&mut self) -> &mut BaseAggregate<Self::Event>;

    /// Returns the aggregate state.
    fn state(&self) -> &Self::State;

    /// Folds one event into the state. Must be deterministic.
    fn apply(&mut self, event: &EventMessage<Self::Event>);

    /// Returns `true` once a soft-delete event has been applied.
    fn is_deleted(&self) -> bool {
        false
    }

    /// Creates an aggregate with default state at version 0.
    #[must_use]
    fn empty(id: AggregateId) -> Self {
        Self::from_parts(BaseAggregate::new(id), Self::State::default())
    }

    /// Rebuilds an aggregate from state captured at `version`.
    #[must_use]
    fn restore(id: AggregateId, version: i64, state: Self::State) -> Self {
        Self::from_parts(BaseAggregate::at_version(id, version), state)
    }

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> &AggregateId {
        self.base().id()
    }

    /// Returns the version the aggregate had when it was loaded.
    fn original_version(&self) -> i64 {
        self.base().original_version()
    }

    /// Returns the version after all applied events.
    fn current_version(&self) -> i64 {
        self.base().current_version()
    }

    /// Returns uncommitted events in application order.
    fn changes(&self) -> &[EventMessage<Self::Event>] {
        self.base().changes()
    }

    /// Clears uncommitted events after persistence.
    fn clear_changes(&mut self) {
        self.base_mut().clear();
    }

    /// Applies a new event and records it as an uncommitted change.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` unless the event's version is
    /// exactly `current_version + 1`, and `DomainError::Validation` if the
    /// event belongs to another aggregate.
    fn apply_event(&mut self, event: EventMessage<Self::Event>) -> Result<(), DomainError> {
        self.base().check_next(&event)?;
        self.apply(&event);
        self.base_mut().record(event);
        Ok(())
    }

    /// Replays committed events without recording them as changes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` on a gap or repeat in the
    /// sequence, and `DomainError::Validation` if the aggregate has
    /// uncommitted changes.
    fn load_from_history<I>(&mut self, events: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = EventMessage<Self::Event>>,
    {
        if !self.changes().is_empty() {
            return Err(DomainError::Validation(format!(
                "cannot replay history onto aggregate {} with uncommitted changes",
                self.aggregate_id()
            )));
        }
        for event in events {
            self.base().check_next(&event)?;
            self.apply(&event);
            self.base_mut().advance();
        }
        Ok(())
    }

    /// Decodes and replays stored events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if a payload does not decode,
    /// otherwise as [`AggregateRoot::load_from_history`].
    fn load_from_stored(&mut self, events: &[StoredEvent]) -> Result<(), DomainError> {
        let decoded = events
            .iter()
            .map(StoredEvent::decode::<Self::Event>)
            .collect::<Result<Vec<_>, _>>()?;
        self.load_from_history(decoded)
    }

    /// Raises a new event from a business method.
    ///
    /// # Errors
    ///
    /// Propagates [`AggregateRoot::apply_event`] errors.
    fn raise(&mut self, payload: Self::Event, ctx: &EventContext<'_>) -> Result<(), DomainError> {
        let metadata = EventMetadata {
            event_id: Uuid::now_v7(),
            event_type: payload.event_type().to_owned(),
            aggregate_id: self.aggregate_id().clone(),
            aggregate_type: Self::AGGREGATE_TYPE.to_owned(),
            version: self.current_version() + 1,
            occurred_at: ctx.clock().now(),
            issuer: ctx.issuer().cloned(),
            correlation_id: ctx.correlation_id(),
        };
        self.apply_event(EventMessage::new(metadata, payload))
    }

    /// Serializes the uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if a payload cannot be encoded.
    fn stored_changes(&self) -> Result<Vec<StoredEvent>, DomainError> {
        self.changes().iter().map(EventMessage::to_stored).collect()
    }
}


#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::test_fixtures::{Turret, TurretEvent};
    use super::*;
    use crate::clock::Clock;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
        }
    }

    fn built_turret(ctx: &EventContext<'_>) -> Turret {
        let mut turret = Turret::empty(AggregateId::from("turret-1"));
        turret.raise(TurretEvent::Built { damage: 10 }, ctx).unwrap();
        turret
    }

    #[test]
    fn test_raise_assigns_next_version_and_records_change() {
        // Arrange
        let clock = FixedClock;
        let correlation_id = Uuid::new_v4();
        let ctx = EventContext::new(&clock)
            .with_issuer(Some(Issuer::user("u-1")))
            .with_correlation_id(correlation_id);

        // Act
        let mut turret = built_turret(&ctx);
        turret.raise(TurretEvent::Upgraded { bonus: 5 }, &ctx).unwrap();

        // Assert
        assert_eq!(turret.original_version(), 0);
        assert_eq!(turret.current_version(), 2);
        assert_eq!(turret.state().damage, 15);
        assert_eq!(turret.state().level, 2);

        let changes = turret.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].event_type(), "TurretBuilt");
        assert_eq!(changes[1].version(), 2);
        let meta = changes[1].metadata();
        assert_eq!(meta.aggregate_type, "Turret");
        assert_eq!(meta.issuer, Some(Issuer::user("u-1")));
        assert_eq!(meta.correlation_id, Some(correlation_id));
        assert_eq!(meta.occurred_at, clock.now());
    }

    #[test]
    fn test_apply_event_rejects_out_of_sequence_version() {
        // Arrange
        let clock = FixedClock;
        let ctx = EventContext::new(&clock);
        let mut turret = built_turret(&ctx);
        let mut metadata = turret.changes()[0].metadata().clone();
        metadata.version = 3;

        // Act
        let result = turret.apply_event(EventMessage::new(metadata, TurretEvent::Demolished));

        // Assert
        match result {
            Err(DomainError::InvalidVersion {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("expected InvalidVersion, got {other:?}"),
        }
        assert_eq!(turret.current_version(), 1);
        assert!(!turret.is_deleted());
    }

    #[test]
    fn test_clear_changes_advances_original_version_and_is_idempotent() {
        // Arrange
        let clock = FixedClock;
        let ctx = EventContext::new(&clock);
        let mut turret = built_turret(&ctx);
        assert_eq!(turret.changes().len(), 1);

        // Act
        turret.clear_changes();

        // Assert
        assert!(turret.changes().is_empty());
        assert_eq!(turret.original_version(), turret.current_version());

        turret.clear_changes();
        assert!(turret.changes().is_empty());
        assert_eq!(turret.original_version(), 1);
        assert_eq!(turret.current_version(), 1);
    }

    #[test]
    fn test_load_from_history_replays_without_recording_changes() {
        // Arrange
        let clock = FixedClock;
        let ctx = EventContext::new(&clock);
        let mut source = built_turret(&ctx);
        source.raise(TurretEvent::Upgraded { bonus: 2 }, &ctx).unwrap();
        source.raise(TurretEvent::Demolished, &ctx).unwrap();
        let history = source.changes().to_vec();

        // Act
        let mut replayed = Turret::empty(AggregateId::from("turret-1"));
        replayed.load_from_history(history).unwrap();

        // Assert
        assert!(replayed.changes().is_empty());
        assert_eq!(replayed.current_version(), 3);
        assert_eq!(replayed.original_version(), 3);
        assert_eq!(replayed.state(), source.state());
        assert!(replayed.is_deleted());
    }

    #[test]
    fn test_load_from_history_rejects_gap() {
        // Arrange
        let clock = FixedClock;
        let ctx = EventContext::new(&clock);
        let mut source = built_turret(&ctx);
        source.raise(TurretEvent::Upgraded { bonus: 2 }, &ctx).unwrap();
        let second_only = vec![source.changes()[1].clone()];

        // Act
        let mut replayed = Turret::empty(AggregateId::from("turret-1"));
        let result = replayed.load_from_history(second_only);

        // Assert
        assert!(matches!(result, Err(DomainError::InvalidVersion { .. })));
        assert_eq!(replayed.current_version(), 0);
    }

    #[test]
    fn test_load_from_stored_decodes_and_replays() {
        let clock = FixedClock;
        let ctx = EventContext::new(&clock);
        let source = built_turret(&ctx);
        let stored = source.stored_changes().unwrap();

        let mut replayed = Turret::empty(AggregateId::from("turret-1"));
        replayed.load_from_stored(&stored).unwrap();

        assert_eq!(replayed.state().damage, 10);
        assert_eq!(replayed.current_version(), 1);
    }

    #[test]
    fn test_restore_starts_clean_at_given_version() {
        let state = test_fixtures::TurretState {
            damage: 30,
            level: 3,
            demolished: false,
        };

        let turret = Turret::restore(AggregateId::from("turret-9"), 7, state.clone());

        assert_eq!(turret.original_version(), 7);
        assert_eq!(turret.current_version(), 7);
        assert!(turret.changes().is_empty());
        assert_eq!(turret.state(), &state);
    }

    #[test]
    fn test_aggregate_id_blank_detection() {
        assert!(AggregateId::from("  ").is_blank());
        assert!(!AggregateId::generate().is_blank());
        assert_eq!(AggregateId::from("cargo-1").to_string(), "cargo-1");
    }
}
