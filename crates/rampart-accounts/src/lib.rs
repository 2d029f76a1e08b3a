//! Rampart — user accounts bounded context.
//!
//! Responsible for user registration, email changes, deactivation and soft
//! deletion, and the `UserView` read model answering user queries.

pub mod application;
pub mod domain;

pub use application::AccountsContext;
