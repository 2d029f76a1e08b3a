//! `Cargo` fixture aggregate for store and repository tests.

use chrono::Duration;
use rampart_core::aggregate::{AggregateId, AggregateRoot, BaseAggregate, EventContext};
use rampart_core::error::DomainError;
use rampart_core::event::{EventMessage, EventPayload, StoredEvent};
use serde::{Deserialize, Serialize};

use crate::clock::{SteppingClock, test_epoch};

/// Events of the `Cargo` fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CargoEvent {
    /// A cargo was registered for a route.
    Created {
        /// Port of departure.
        origin: String,
        /// Port of arrival.
        destination: String,
    },
    /// A shipment was loaded onto the cargo.
    ShipmentLoaded {
        /// Shipment weight.
        weight_kg: u32,
    },
}

impl EventPayload for CargoEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "CargoCreated",
            Self::ShipmentLoaded { .. } => "ShipmentLoaded",
        }
    }
}

/// State of the `Cargo` fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoState {
    /// Port of departure.
    pub origin: String,
    /// Port of arrival.
    pub destination: String,
    /// Total loaded weight.
    pub loaded_kg: u64,
    /// Number of shipments loaded.
    pub shipments: u32,
}

/// A minimal aggregate: created once, then loaded with shipments.
#[derive(Debug, Clone)]
pub struct Cargo {
    base: BaseAggregate<CargoEvent>,
    state: CargoState,
}

impl Cargo {
    /// Registers a new cargo.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a port is blank.
    pub fn create(
        id: AggregateId,
        origin: &str,
        destination: &str,
        ctx: &EventContext<'_>,
    ) -> Result<Self, DomainError> {
        if origin.trim().is_empty() || destination.trim().is_empty() {
            return Err(DomainError::Validation(
                "cargo route needs an origin and a destination".into(),
            ));
        }
        let mut cargo = Self::empty(id);
        cargo.raise(
            CargoEvent::Created {
                origin: origin.to_owned(),
                destination: destination.to_owned(),
            },
            ctx,
        )?;
        Ok(cargo)
    }

    /// Loads a shipment.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unregistered cargo or an
    /// empty shipment.
    pub fn load_shipment(
        &mut self,
        weight_kg: u32,
        ctx: &EventContext<'_>,
    ) -> Result<(), DomainError> {
        if self.current_version() == 0 {
            return Err(DomainError::Validation(format!(
                "cargo {} is not registered",
                self.aggregate_id()
            )));
        }
        if weight_kg == 0 {
            return Err(DomainError::Validation("shipment weight must be positive".into()));
        }
        self.raise(CargoEvent::ShipmentLoaded { weight_kg }, ctx)
    }
}

impl AggregateRoot for Cargo {
    const AGGREGATE_TYPE: &'static str = "Cargo";
    type Event = CargoEvent;
    type State = CargoState;

    fn from_parts(base: BaseAggregate<CargoEvent>, state: CargoState) -> Self {
        Self { base, state }
    }

    fn base(&self) -> &BaseAggregate<CargoEvent> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseAggregate<CargoEvent> {
        &mut self.base
    }

    fn state(&self) -> &CargoState {
        &self.state
    }

    fn apply(&mut self, event: &EventMessage<CargoEvent>) {
        match event.payload() {
            CargoEvent::Created {
                origin,
                destination,
            } => {
                self.state.origin.clone_from(origin);
                self.state.destination.clone_from(destination);
            }
            CargoEvent::ShipmentLoaded { weight_kg } => {
                self.state.loaded_kg += u64::from(*weight_kg);
                self.state.shipments += 1;
            }
        }
    }
}

/// Builds a committed history for `id`: one `CargoCreated` followed by
/// `shipments` `ShipmentLoaded` events weighing 10, 20, 30, ... kg.
///
/// # Panics
///
/// Panics if the fixture fails to raise or serialize an event.
#[must_use]
pub fn cargo_history(id: &str, shipments: u32) -> Vec<StoredEvent> {
    let clock = SteppingClock::new(test_epoch(), Duration::seconds(1));
    let ctx = EventContext::new(&clock);
    let mut cargo = Cargo::create(AggregateId::from(id), "Rotterdam", "Singapore", &ctx)
        .expect("fixture cargo is valid");
    for n in 1..=shipments {
        cargo
            .load_shipment(n * 10, &ctx)
            .expect("fixture shipment is valid");
    }
    cargo.stored_changes().expect("fixture events serialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_replays_to_expected_state() {
        // Arrange
        let history = cargo_history("cargo-1", 3);

        // Act
        let mut cargo = Cargo::empty(AggregateId::from("cargo-1"));
        cargo.load_from_stored(&history).unwrap();

        // Assert
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].event_type, "CargoCreated");
        assert_eq!(cargo.current_version(), 4);
        assert_eq!(cargo.state().loaded_kg, 60);
        assert_eq!(cargo.state().shipments, 3);
        assert!(cargo.changes().is_empty());
    }

    #[test]
    fn test_unregistered_cargo_rejects_shipment() {
        let clock = crate::FixedClock::default();
        let ctx = EventContext::new(&clock);
        let mut cargo = Cargo::empty(AggregateId::from("cargo-1"));

        let result = cargo.load_shipment(5, &ctx);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}
