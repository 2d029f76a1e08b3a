//! Runtime plumbing for the Rampart engine.
//!
//! Commands enter through [`CommandDispatcher`], run against aggregates via
//! [`AggregateCommandExecutor`], and the committed events fan out over an
//! [`EventBus`](rampart_core::bus::EventBus) to projections managed by
//! [`ProjectionManager`]. Queries go through [`QueryDispatcher`] and usually
//! read from a [`ReadStore`](rampart_core::read_store::ReadStore).

pub mod command_dispatcher;
pub mod event_bus;
pub mod executor;
pub mod projection_manager;
pub mod query_dispatcher;
pub mod read_store;
pub mod retry;
pub mod telemetry;

pub use command_dispatcher::CommandDispatcher;
pub use event_bus::InMemoryEventBus;
pub use executor::AggregateCommandExecutor;
pub use projection_manager::{ProjectionManager, ProjectionStatus, ReplayReport};
pub use query_dispatcher::QueryDispatcher;
pub use read_store::InMemoryReadStore;
pub use retry::retry_on_conflict;
