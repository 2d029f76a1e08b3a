//! Shared test doubles and fixtures for the Rampart engine.

mod bus;
mod cargo;
mod clock;
mod event_store;
mod telemetry;

pub use bus::{RecordingEventBus, RecordingHandler};
pub use cargo::{Cargo, CargoEvent, CargoState, cargo_history};
pub use clock::{FixedClock, SteppingClock, test_epoch};
pub use event_store::{EmptyEventStore, FailingEventStore, RecordingEventStore, SavedBatch};
pub use telemetry::init_test_tracing;
