//! Domain model of the accounts context.

pub mod aggregates;
pub mod commands;
pub mod events;
