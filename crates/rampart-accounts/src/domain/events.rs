//! Domain events for the accounts context.

use rampart_core::event::EventPayload;
use serde::{Deserialize, Serialize};

/// Event type names of the `User` aggregate.
pub const USER_EVENT_TYPES: [&str; 4] = [
    "UserCreated",
    "UserEmailChanged",
    "UserDeactivated",
    "UserDeleted",
];

/// Event payload variants of the `User` aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    /// A user registered.
    Created {
        /// Contact email.
        email: String,
        /// Name shown to other users.
        display_name: String,
    },
    /// A user changed their email.
    EmailChanged {
        /// The email before the change.
        previous: String,
        /// The new email.
        email: String,
    },
    /// A user was deactivated and can no longer sign in.
    Deactivated {
        /// Optional operator note.
        reason: Option<String>,
    },
    /// A user was soft-deleted. The stream is kept.
    Deleted,
}

impl EventPayload for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "UserCreated",
            Self::EmailChanged { .. } => "UserEmailChanged",
            Self::Deactivated { .. } => "UserDeactivated",
            Self::Deleted => "UserDeleted",
        }
    }
}
