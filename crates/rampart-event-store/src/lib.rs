//! Rampart Event Store — event, snapshot and state persistence.
//!
//! Provides the in-memory and `PostgreSQL` stores and the event-sourced,
//! state-based and hybrid repository strategies built on them.

pub mod in_memory;
pub mod pg_event_store;
pub mod repository;
pub mod schema;

pub use in_memory::{InMemoryEventStore, InMemoryStateStore};
pub use pg_event_store::PgEventStore;
