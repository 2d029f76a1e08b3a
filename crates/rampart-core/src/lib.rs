//! Rampart Core — shared CQRS and event-sourcing abstractions.
//!
//! This crate defines the traits and value types every store, dispatcher
//! and bounded context depends on. It contains no infrastructure code.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod event_store;
pub mod projection;
pub mod query;
pub mod read_store;
pub mod repository;
pub mod snapshot;
pub mod state;
